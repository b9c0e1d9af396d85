pub mod consensus_params;
pub mod crypto;
pub mod error;
pub mod payload;
pub mod synchronized_data;
pub mod transaction;

pub use consensus_params::{consensus_threshold, ConsensusParams};
pub use error::{AbciAppError, CodecError, ConfigError, PayloadRejection, StateError};
pub use payload::{BaseTxPayload, PayloadRegistry, TransactionType, TxPayload};
pub use synchronized_data::{SynchronizedData, SynchronizedDataUpdate};
pub use transaction::Transaction;

/// The address of an agent taking part in a period.
///
/// Addresses are opaque to the engine; the only operations performed on them
/// are equality, ordering (for deterministic iteration) and comparison against
/// the addresses recovered from a transaction signature.
pub type Address = String;

/// Height of a block in the ephemeral chain of a period. Heights start at 1, a
/// height of 0 denotes the empty chain.
pub type BlockHeight = u64;
