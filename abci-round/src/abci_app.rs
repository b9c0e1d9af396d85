use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use abci_round_core::{AbciAppError, ConfigError, ConsensusParams, SynchronizedData, Transaction};

use crate::adaptor::{Adaptor, TransitionFunction};
use crate::round::Round;
use crate::timeouts::{TimeoutId, Timeouts};

/// Drives the rounds of an application along its transition function.
///
/// The app holds exactly one current round until it reaches a round with no
/// transition for the event it emitted, at which point it is finished.
pub struct AbciApp<A: Adaptor> {
    adaptor: A,
    transition_function: TransitionFunction<A::RoundKind, A::Event>,
    event_to_timeout: BTreeMap<A::Event, Duration>,
    final_states: BTreeSet<A::RoundKind>,
    initial_data: SynchronizedData,
    consensus_params: ConsensusParams,

    current_round_kind: Option<A::RoundKind>,
    current_round: Option<Box<dyn Round<A::Event>>>,
    last_round_id: Option<&'static str>,
    /// Ids of the rounds that are done, oldest first
    previous_rounds: Vec<&'static str>,
    round_results: Vec<SynchronizedData>,

    last_timestamp: Option<SystemTime>,
    current_timeout_entries: Vec<TimeoutId>,
    timeouts: Timeouts<A::Event>,
}

impl<A: Adaptor> AbciApp<A> {
    /// Build an app, checking that the application definition is consistent.
    ///
    /// # Params
    /// - adaptor: the application definition
    /// - initial_data: the state the initial round starts from
    /// - consensus_params: the committee parameters
    ///
    /// # Returns
    /// A [`ConfigError`] if the initial round is not a round of the transition
    /// function, has no outgoing transition or has a timeout event, or if a
    /// final state has outgoing transitions.
    pub fn new(
        adaptor: A,
        initial_data: SynchronizedData,
        consensus_params: ConsensusParams,
    ) -> Result<Self, ConfigError> {
        let transition_function = adaptor.transition_function();
        let event_to_timeout = adaptor.event_to_timeout();
        let final_states = adaptor.final_states();
        Self::check_consistency(
            adaptor.initial_round(),
            &transition_function,
            &event_to_timeout,
            &final_states,
        )?;

        Ok(AbciApp {
            adaptor,
            transition_function,
            event_to_timeout,
            final_states,
            initial_data,
            consensus_params,
            current_round_kind: None,
            current_round: None,
            last_round_id: None,
            previous_rounds: vec![],
            round_results: vec![],
            last_timestamp: None,
            current_timeout_entries: vec![],
            timeouts: Timeouts::new(),
        })
    }

    fn check_consistency(
        initial_round: A::RoundKind,
        transition_function: &TransitionFunction<A::RoundKind, A::Event>,
        event_to_timeout: &BTreeMap<A::Event, Duration>,
        final_states: &BTreeSet<A::RoundKind>,
    ) -> Result<(), ConfigError> {
        let states = Self::round_kinds(transition_function);
        if !states.contains(&initial_round) {
            return Err(ConfigError::InitialRoundNotAState {
                initial: format!("{:?}", initial_round),
                states: format!("{:?}", states),
            });
        }

        let initial_transitions = transition_function.get(&initial_round);
        if initial_transitions.map_or(true, BTreeMap::is_empty) {
            return Err(ConfigError::InitialRoundWithoutTransitions(format!("{:?}", initial_round)));
        }

        let timeout_events: Vec<&A::Event> = initial_transitions
            .into_iter()
            .flat_map(BTreeMap::keys)
            .filter(|event| event_to_timeout.contains_key(event))
            .collect();
        if !timeout_events.is_empty() {
            return Err(ConfigError::InitialRoundWithTimeouts {
                initial: format!("{:?}", initial_round),
                events: format!("{:?}", timeout_events),
            });
        }

        for state in final_states {
            if transition_function.get(state).map_or(false, |t| !t.is_empty()) {
                return Err(ConfigError::FinalStateWithTransitions(format!("{:?}", state)));
            }
        }
        Ok(())
    }

    fn round_kinds(transition_function: &TransitionFunction<A::RoundKind, A::Event>) -> BTreeSet<A::RoundKind> {
        transition_function
            .iter()
            .flat_map(|(from, transitions)| std::iter::once(*from).chain(transitions.values().copied()))
            .collect()
    }

    /// Every round kind appearing in the transition function.
    pub fn get_all_round_kinds(&self) -> BTreeSet<A::RoundKind> {
        Self::round_kinds(&self.transition_function)
    }

    pub fn adaptor(&self) -> &A {
        &self.adaptor
    }

    pub fn consensus_params(&self) -> &ConsensusParams {
        &self.consensus_params
    }

    pub fn transition_function(&self) -> &TransitionFunction<A::RoundKind, A::Event> {
        &self.transition_function
    }

    /// The latest round result, or the initial state if no round is done yet.
    pub fn synchronized_data(&self) -> &SynchronizedData {
        self.round_results.last().unwrap_or(&self.initial_data)
    }

    pub fn last_timestamp(&self) -> Result<SystemTime, AbciAppError> {
        self.last_timestamp
            .ok_or_else(|| AbciAppError::internal("last timestamp is None"))
    }

    pub fn setup(&mut self) -> Result<(), AbciAppError> {
        self.schedule_round(self.adaptor.initial_round())
    }

    /// Make a round of kind `kind` the current round.
    ///
    /// The timeouts of the round being left are cancelled, and a timeout is
    /// scheduled for every outgoing event of the new round that has one. The
    /// new round starts from the latest round result.
    fn schedule_round(&mut self, kind: A::RoundKind) -> Result<(), AbciAppError> {
        debug!("scheduling new round: {:?}", kind);
        for entry_id in self.current_timeout_entries.drain(..) {
            self.timeouts.cancel_timeout(entry_id);
        }

        for event in self.outgoing_events(kind) {
            if let Some(timeout) = self.event_to_timeout.get(&event).copied() {
                // may be earlier than the latest block time while expired
                // timeouts are replayed by update_time
                let deadline = self.last_timestamp()? + timeout;
                let entry_id = self.timeouts.add_timeout(deadline, event);
                debug!(
                    "scheduling timeout of {:?} for event {} with deadline {:?}",
                    timeout, event, deadline
                );
                self.current_timeout_entries.push(entry_id);
            }
        }

        let last_result = self.synchronized_data().clone();
        self.last_round_id = self.current_round.as_ref().map(|round| round.round_id());
        let round = self.adaptor.make_round(kind, last_result, self.consensus_params);
        self.current_round_kind = Some(kind);
        self.current_round = Some(round);
        info!(
            "Entered in the '{}' round for period {}",
            self.current_round_id().unwrap_or_default(),
            self.synchronized_data().period_count()
        );
        Ok(())
    }

    fn outgoing_events(&self, kind: A::RoundKind) -> Vec<A::Event> {
        self.transition_function
            .get(&kind)
            .map(|transitions| transitions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Fail if a round of kind `kind` has timeouts to schedule while the app
    /// clock is not set.
    fn check_schedulable(&self, kind: A::RoundKind) -> Result<(), AbciAppError> {
        let has_timeouts = self
            .outgoing_events(kind)
            .iter()
            .any(|event| self.event_to_timeout.contains_key(event));
        if has_timeouts {
            self.last_timestamp()?;
        }
        Ok(())
    }

    pub fn current_round(&self) -> Result<&dyn Round<A::Event>, AbciAppError> {
        self.current_round
            .as_deref()
            .ok_or_else(|| AbciAppError::internal("current_round not set!"))
    }

    fn current_round_mut(&mut self) -> Result<&mut (dyn Round<A::Event> + 'static), AbciAppError> {
        self.current_round
            .as_deref_mut()
            .ok_or_else(|| AbciAppError::internal("current_round not set!"))
    }

    pub fn current_round_kind(&self) -> Option<A::RoundKind> {
        self.current_round_kind
    }

    pub fn current_round_id(&self) -> Option<&'static str> {
        self.current_round.as_ref().map(|round| round.round_id())
    }

    /// Number of rounds that are done.
    pub fn current_round_height(&self) -> usize {
        self.previous_rounds.len()
    }

    pub fn previous_rounds(&self) -> &[&'static str] {
        &self.previous_rounds
    }

    pub fn last_round_id(&self) -> Option<&'static str> {
        self.last_round_id
    }

    pub fn is_finished(&self) -> bool {
        self.current_round.is_none()
    }

    /// Whether the current round is one of the application's final states.
    pub fn is_in_final_state(&self) -> bool {
        self.current_round_kind
            .map_or(false, |kind| self.final_states.contains(&kind))
    }

    pub fn latest_result(&self) -> Option<&SynchronizedData> {
        self.round_results.last()
    }

    /// Number of pending timeouts, cancelled ones included.
    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.size()
    }

    pub fn check_transaction(&self, transaction: &Transaction) -> Result<(), AbciAppError> {
        self.current_round()?.check_transaction(transaction)
    }

    pub fn process_transaction(&mut self, transaction: &Transaction) -> Result<(), AbciAppError> {
        self.current_round_mut()?.process_transaction(transaction)
    }

    /// Leave the current round on `event`.
    ///
    /// `result` becomes the state the next round starts from. When the round
    /// was ended without producing a state, its own starting state is recorded
    /// as its result.
    pub fn process_event(&mut self, event: A::Event, result: Option<SynchronizedData>) -> Result<(), AbciAppError> {
        let Some(kind) = self.current_round_kind else {
            info!("cannot process event '{}' as current state is not set", event);
            return Ok(());
        };
        let next_kind = self
            .transition_function
            .get(&kind)
            .and_then(|transitions| transitions.get(&event))
            .copied();
        if let Some(next_kind) = next_kind {
            self.check_schedulable(next_kind)?;
        }

        let round = self.current_round()?;
        let round_id = round.round_id();
        let result = match result {
            Some(result) => result,
            None => {
                debug!("'{}' round ended without a result, keeping its state", round_id);
                round.synchronized_data().clone()
            }
        };
        self.previous_rounds.push(round_id);
        self.round_results.push(result);

        info!("'{}' round is done with event: {}", round_id, event);
        match next_kind {
            Some(next_kind) => self.schedule_round(next_kind),
            None => {
                warn!("AbciApp has reached a dead end.");
                self.current_round_kind = None;
                self.current_round = None;
                Ok(())
            }
        }
    }

    /// Observe the timestamp of the latest block, firing every timeout whose
    /// deadline is not after it.
    ///
    /// Expired timeouts are processed in deadline order, and the app clock is
    /// set to each expired deadline in turn so that timeouts scheduled by the
    /// rounds entered meanwhile are measured from it. The clock then moves to
    /// `timestamp`.
    pub fn update_time(&mut self, timestamp: SystemTime) -> Result<(), AbciAppError> {
        debug!("arrived block with timestamp: {:?}", timestamp);
        debug!("current AbciApp time: {:?}", self.last_timestamp);

        self.timeouts.pop_earliest_cancelled_timeouts();
        while let Some((deadline, _)) = self.timeouts.get_earliest_timeout() {
            if deadline > timestamp {
                break;
            }
            let Some((expired_deadline, event)) = self.timeouts.pop_timeout() else {
                break;
            };
            warn!(
                "expired deadline {:?} with event {} at AbciApp time {:?}",
                expired_deadline, event, timestamp
            );

            self.last_timestamp = Some(expired_deadline);
            debug!("current AbciApp time: {:?}", self.last_timestamp);
            self.process_event(event, None)?;

            self.timeouts.pop_earliest_cancelled_timeouts();
        }

        self.last_timestamp = Some(timestamp);
        debug!("final AbciApp time: {:?}", self.last_timestamp);
        Ok(())
    }
}
