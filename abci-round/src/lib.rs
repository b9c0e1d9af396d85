//! Round-based state machine replicated over an ABCI-style consensus engine.
//!
//! An application is described by an [`Adaptor`]: its rounds, the events they
//! emit and the transitions between them. [`AbciApp`] drives the rounds and
//! their timeouts, and [`Period`] feeds it the blocks delivered by the
//! consensus engine.

pub mod abci_app;
pub mod adaptor;
pub mod aggregation;
pub mod blockchain;
pub mod period;
pub mod quorum;
pub mod round;
pub mod timeouts;


pub use abci_app::AbciApp;
pub use adaptor::{Adaptor, TransitionFunction};
pub use aggregation::{Aggregation, Decision, RoundContext, VoteOutcome};
pub use blockchain::{Block, BlockBuilder, Blockchain, Header};
pub use period::{BlockConstructionPhase, Period};
pub use round::{AbstractRound, Round, RoundBehaviour, RoundResult};
pub use timeouts::{TimeoutId, Timeouts};
