use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::time::Duration;

use abci_round_core::{ConsensusParams, SynchronizedData};

use crate::round::Round;

/// The rounds of an application and the edges between them.
pub type TransitionFunction<R, E> = BTreeMap<R, BTreeMap<E, R>>;

/// Defines an application run by an [`crate::abci_app::AbciApp`].
///
/// Rounds are named by a `RoundKind` value; the application instantiates a
/// round of a given kind on demand.
pub trait Adaptor {
    type Event: Copy + Eq + Ord + Hash + Debug + Display + 'static;
    type RoundKind: Copy + Eq + Ord + Hash + Debug + 'static;

    fn initial_round(&self) -> Self::RoundKind;

    fn transition_function(&self) -> TransitionFunction<Self::RoundKind, Self::Event>;

    /// Events fired when a round lasts longer than the associated duration.
    fn event_to_timeout(&self) -> BTreeMap<Self::Event, Duration> {
        BTreeMap::new()
    }

    /// Rounds in which the application is considered done.
    fn final_states(&self) -> BTreeSet<Self::RoundKind> {
        BTreeSet::new()
    }

    /// Build a fresh round of the given kind, starting from `data`.
    fn make_round(
        &self,
        kind: Self::RoundKind,
        data: SynchronizedData,
        params: ConsensusParams,
    ) -> Box<dyn Round<Self::Event>>;
}
