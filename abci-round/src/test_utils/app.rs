//! A small application exercising every aggregation strategy: agents register,
//! share randomness, elect a keeper, agree on a transaction which the keeper
//! finalizes, vote on the outcome and start over.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use abci_round_core::{
    AbciAppError, Address, ConfigError, ConsensusParams, PayloadRegistry, SynchronizedData, TxPayload,
};

use crate::adaptor::{Adaptor, TransitionFunction};
use crate::aggregation::{
    CollectDifferentUntilAll, CollectDifferentUntilThreshold, CollectSameUntilThreshold, Decision, NoCollection,
    OnlyKeeperSends, VoteOutcome, Voting, MOST_VOTED_KEEPER_ADDRESS,
};
use crate::round::{AbstractRound, Round, RoundBehaviour, RoundResult};

pub const MOST_VOTED_TX_HASH: &str = "most_voted_tx_hash";
pub const TX_SUBMITTER: &str = "tx_submitter";
pub const PARTICIPANT_TO_RANDOMNESS: &str = "participant_to_randomness";
pub const FINAL_TX_HASH: &str = "final_tx_hash";

/// Fields kept from one period to the next.
pub const CROSS_PERIOD_KEYS: &[&str] = &[FINAL_TX_HASH];

pub const ROUND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegistrationPayload {}

impl TxPayload for RegistrationPayload {
    const TRANSACTION_TYPE: &'static str = "registration";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RandomnessPayload {
    pub round_id: u64,
    pub randomness: String,
}

impl TxPayload for RandomnessPayload {
    const TRANSACTION_TYPE: &'static str = "randomness";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SelectKeeperPayload {
    pub keeper: Address,
}

impl TxPayload for SelectKeeperPayload {
    const TRANSACTION_TYPE: &'static str = "select_keeper";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionHashPayload {
    pub tx_hash: String,
}

impl TxPayload for TransactionHashPayload {
    const TRANSACTION_TYPE: &'static str = "transaction_hash";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FinalizationPayload {
    pub tx_digest: String,
}

impl TxPayload for FinalizationPayload {
    const TRANSACTION_TYPE: &'static str = "finalization";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ValidatePayload {
    pub vote: Option<bool>,
}

impl TxPayload for ValidatePayload {
    const TRANSACTION_TYPE: &'static str = "validate";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResetPayload {
    pub period_count: u64,
}

impl TxPayload for ResetPayload {
    const TRANSACTION_TYPE: &'static str = "reset";
}

pub fn registry() -> Result<PayloadRegistry, ConfigError> {
    PayloadRegistry::new()
        .with::<RegistrationPayload>()?
        .with::<RandomnessPayload>()?
        .with::<SelectKeeperPayload>()?
        .with::<TransactionHashPayload>()?
        .with::<FinalizationPayload>()?
        .with::<ValidatePayload>()?
        .with::<ResetPayload>()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DemoEvent {
    Done,
    Negative,
    Abstain,
    NoMajority,
    RoundTimeout,
}

impl Display for DemoEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let event = match self {
            DemoEvent::Done => "done",
            DemoEvent::Negative => "negative",
            DemoEvent::Abstain => "abstain",
            DemoEvent::NoMajority => "no_majority",
            DemoEvent::RoundTimeout => "round_timeout",
        };
        write!(f, "{}", event)
    }
}

fn no_majority<B: RoundBehaviour<Event = DemoEvent>>(round: &AbstractRound<B>) -> Option<RoundResult<DemoEvent>> {
    Some((round.synchronized_data().clone(), DemoEvent::NoMajority))
}

pub struct RegistrationRound;

impl RoundBehaviour for RegistrationRound {
    type Event = DemoEvent;
    type Aggregation = CollectDifferentUntilAll;

    const ROUND_ID: &'static str = "registration";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(RegistrationPayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "sender";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        let Decision::Reached(senders) = round.decide() else {
            return Ok(None);
        };
        let participants = senders.iter().filter_map(|v| v.as_str().map(str::to_string));
        let data = round.synchronized_data().update().participants(participants).build();
        Ok(Some((data, DemoEvent::Done)))
    }
}

pub struct RandomnessRound;

impl RoundBehaviour for RandomnessRound {
    type Event = DemoEvent;
    type Aggregation = CollectDifferentUntilThreshold;

    const ROUND_ID: &'static str = "randomness";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(RandomnessPayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "randomness";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        let Decision::Reached(payloads) = round.decide() else {
            return Ok(None);
        };
        let randomness: Map<String, Value> = payloads
            .iter()
            .filter_map(|(sender, payload)| payload.attribute(Self::PAYLOAD_ATTRIBUTE).map(|r| (sender.clone(), r)))
            .collect();
        let data = round
            .synchronized_data()
            .update()
            .set(PARTICIPANT_TO_RANDOMNESS, randomness)
            .build();
        Ok(Some((data, DemoEvent::Done)))
    }
}

pub struct SelectKeeperRound;

impl RoundBehaviour for SelectKeeperRound {
    type Event = DemoEvent;
    type Aggregation = CollectSameUntilThreshold;

    const ROUND_ID: &'static str = "select_keeper";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(SelectKeeperPayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "keeper";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        Ok(match round.decide() {
            Decision::Reached(keeper) => {
                let data = round
                    .synchronized_data()
                    .update()
                    .set(MOST_VOTED_KEEPER_ADDRESS, keeper)
                    .build();
                Some((data, DemoEvent::Done))
            }
            Decision::NoMajority => no_majority(round),
            Decision::Pending => None,
        })
    }
}

pub struct TransactionRound;

impl RoundBehaviour for TransactionRound {
    type Event = DemoEvent;
    type Aggregation = CollectSameUntilThreshold;

    const ROUND_ID: &'static str = "transaction";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(TransactionHashPayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "tx_hash";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        Ok(match round.decide() {
            Decision::Reached(tx_hash) => {
                let data = round
                    .synchronized_data()
                    .update()
                    .set(MOST_VOTED_TX_HASH, tx_hash)
                    .set(TX_SUBMITTER, Self::ROUND_ID)
                    .build();
                Some((data, DemoEvent::Done))
            }
            Decision::NoMajority => no_majority(round),
            Decision::Pending => None,
        })
    }
}

pub struct FinalizationRound;

impl RoundBehaviour for FinalizationRound {
    type Event = DemoEvent;
    type Aggregation = OnlyKeeperSends;

    const ROUND_ID: &'static str = "finalization";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(FinalizationPayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "tx_digest";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        let Decision::Reached(tx_digest) = round.decide() else {
            return Ok(None);
        };
        let data = round.synchronized_data().update().set(FINAL_TX_HASH, tx_digest).build();
        Ok(Some((data, DemoEvent::Done)))
    }
}

pub struct ValidateRound;

impl RoundBehaviour for ValidateRound {
    type Event = DemoEvent;
    type Aggregation = Voting;

    const ROUND_ID: &'static str = "validate";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(ValidatePayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "vote";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        let event = match round.decide() {
            Decision::Reached(VoteOutcome::Positive) => DemoEvent::Done,
            Decision::Reached(VoteOutcome::Negative) => DemoEvent::Negative,
            Decision::Reached(VoteOutcome::Abstain) => DemoEvent::Abstain,
            Decision::NoMajority => DemoEvent::NoMajority,
            Decision::Pending => return Ok(None),
        };
        Ok(Some((round.synchronized_data().clone(), event)))
    }
}

pub struct ResetRound;

impl RoundBehaviour for ResetRound {
    type Event = DemoEvent;
    type Aggregation = CollectSameUntilThreshold;

    const ROUND_ID: &'static str = "reset";
    const ALLOWED_TX_TYPE: Option<&'static str> = Some(ResetPayload::TRANSACTION_TYPE);
    const PAYLOAD_ATTRIBUTE: &'static str = "period_count";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        match round.decide() {
            Decision::Reached(period_count) => {
                let period_count = period_count
                    .as_u64()
                    .ok_or_else(|| AbciAppError::internal(format!("invalid period count: {}", period_count)))?;
                let data = round.synchronized_data().new_period(period_count, CROSS_PERIOD_KEYS);
                Ok(Some((data, DemoEvent::Done)))
            }
            Decision::NoMajority => Ok(no_majority(round)),
            Decision::Pending => Ok(None),
        }
    }
}

/// Degenerate round: takes no transactions and never ends.
pub struct FinishedRound;

impl RoundBehaviour for FinishedRound {
    type Event = DemoEvent;
    type Aggregation = NoCollection;

    const ROUND_ID: &'static str = "finished";
    const ALLOWED_TX_TYPE: Option<&'static str> = None;

    fn end_block(_round: &AbstractRound<Self>) -> Result<Option<RoundResult<DemoEvent>>, AbciAppError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DemoRound {
    Registration,
    Randomness,
    SelectKeeper,
    Transaction,
    Finalization,
    Validate,
    Reset,
    Finished,
}

/// The demo application. Its definition is plain data so tests can reshape
/// it.
#[derive(Debug, Clone)]
pub struct DemoApp {
    pub initial_round: DemoRound,
    pub transition_function: TransitionFunction<DemoRound, DemoEvent>,
    pub event_to_timeout: BTreeMap<DemoEvent, Duration>,
    pub final_states: BTreeSet<DemoRound>,
}

impl DemoApp {
    /// An application with no transitions at all.
    pub fn empty(initial_round: DemoRound) -> Self {
        DemoApp {
            initial_round,
            transition_function: BTreeMap::new(),
            event_to_timeout: BTreeMap::new(),
            final_states: BTreeSet::new(),
        }
    }

    pub fn new() -> Self {
        use DemoEvent::*;
        use DemoRound::*;

        let mut app = Self::empty(Registration);
        for (from, event, to) in [
            (Registration, Done, Randomness),
            (Randomness, Done, SelectKeeper),
            (Randomness, RoundTimeout, Randomness),
            (SelectKeeper, Done, Transaction),
            (SelectKeeper, NoMajority, Reset),
            (SelectKeeper, RoundTimeout, Reset),
            (Transaction, Done, Finalization),
            (Transaction, NoMajority, Reset),
            (Transaction, RoundTimeout, Reset),
            (Finalization, Done, Validate),
            (Finalization, RoundTimeout, Reset),
            (Validate, Done, Finished),
            (Validate, Negative, Reset),
            (Validate, Abstain, Reset),
            (Validate, NoMajority, Reset),
            (Validate, RoundTimeout, Reset),
            (Reset, Done, Randomness),
            (Reset, NoMajority, Reset),
            (Reset, RoundTimeout, Reset),
        ] {
            app.add_transition(from, event, to);
        }
        app.event_to_timeout.insert(RoundTimeout, ROUND_TIMEOUT);
        app.final_states.insert(Finished);
        app
    }

    pub fn add_transition(&mut self, from: DemoRound, event: DemoEvent, to: DemoRound) {
        self.transition_function.entry(from).or_default().insert(event, to);
    }
}

impl Adaptor for DemoApp {
    type Event = DemoEvent;
    type RoundKind = DemoRound;

    fn initial_round(&self) -> DemoRound {
        self.initial_round
    }

    fn transition_function(&self) -> TransitionFunction<DemoRound, DemoEvent> {
        self.transition_function.clone()
    }

    fn event_to_timeout(&self) -> BTreeMap<DemoEvent, Duration> {
        self.event_to_timeout.clone()
    }

    fn final_states(&self) -> BTreeSet<DemoRound> {
        self.final_states.clone()
    }

    fn make_round(
        &self,
        kind: DemoRound,
        data: SynchronizedData,
        params: ConsensusParams,
    ) -> Box<dyn Round<DemoEvent>> {
        match kind {
            DemoRound::Registration => AbstractRound::<RegistrationRound>::boxed(data, params),
            DemoRound::Randomness => AbstractRound::<RandomnessRound>::boxed(data, params),
            DemoRound::SelectKeeper => AbstractRound::<SelectKeeperRound>::boxed(data, params),
            DemoRound::Transaction => AbstractRound::<TransactionRound>::boxed(data, params),
            DemoRound::Finalization => AbstractRound::<FinalizationRound>::boxed(data, params),
            DemoRound::Validate => AbstractRound::<ValidateRound>::boxed(data, params),
            DemoRound::Reset => AbstractRound::<ResetRound>::boxed(data, params),
            DemoRound::Finished => AbstractRound::<FinishedRound>::boxed(data, params),
        }
    }
}

#[cfg(test)]
mod tests {
    use abci_round_core::Transaction;

    use super::*;
    use crate::test_utils::TestAgents;

    fn validate(votes: &[Option<bool>]) -> Option<DemoEvent> {
        let agents = TestAgents::new(4);
        let mut round = AbstractRound::<ValidateRound>::new(agents.synchronized_data(), ConsensusParams::new(4));
        for (i, vote) in votes.iter().enumerate() {
            round.process_transaction(&agents.sign(i, &ValidatePayload { vote: *vote })).unwrap();
        }
        round.end_block().unwrap().map(|(_, event)| event)
    }

    #[test]
    fn registry_decodes_every_payload() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 7);

        let agents = TestAgents::new(1);
        let transactions = vec![
            agents.sign(0, &RegistrationPayload {}),
            agents.sign(0, &RandomnessPayload { round_id: 1, randomness: "aa".to_string() }),
            agents.sign(0, &SelectKeeperPayload { keeper: agents.address(0) }),
            agents.sign(0, &TransactionHashPayload { tx_hash: "0x01".to_string() }),
            agents.sign(0, &FinalizationPayload { tx_digest: "0x02".to_string() }),
            agents.sign(0, &ValidatePayload { vote: None }),
            agents.sign(0, &ResetPayload { period_count: 3 }),
        ];
        for tx in transactions {
            let decoded = Transaction::decode(&tx.encode().unwrap(), &registry).unwrap();
            assert_eq!(decoded, tx);
        }
    }

    #[test]
    fn round_ids_are_unique() {
        let app = DemoApp::new();
        let data = SynchronizedData::new();
        let params = ConsensusParams::new(4);

        let ids: BTreeSet<&str> = [
            DemoRound::Registration,
            DemoRound::Randomness,
            DemoRound::SelectKeeper,
            DemoRound::Transaction,
            DemoRound::Finalization,
            DemoRound::Validate,
            DemoRound::Reset,
            DemoRound::Finished,
        ]
        .into_iter()
        .map(|kind| app.make_round(kind, data.clone(), params).round_id())
        .collect();
        assert_eq!(ids.len(), 8);
    }

    #[test]
    fn validate_round_events() {
        assert_eq!(validate(&[Some(true), Some(true)]), None);
        assert_eq!(validate(&[Some(true), Some(true), Some(true)]), Some(DemoEvent::Done));
        assert_eq!(validate(&[Some(false), Some(false), Some(false)]), Some(DemoEvent::Negative));
        assert_eq!(validate(&[None, None, None, Some(true)]), Some(DemoEvent::Abstain));
        assert_eq!(validate(&[Some(true), Some(false), None]), Some(DemoEvent::NoMajority));
    }

    #[test]
    fn reset_round_starts_new_period() {
        let agents = TestAgents::new(4);
        let data = agents
            .synchronized_data()
            .update()
            .set(FINAL_TX_HASH, "0xbeef")
            .set(MOST_VOTED_TX_HASH, "0xfeed")
            .build();
        let mut round = AbstractRound::<ResetRound>::new(data, ConsensusParams::new(4));
        for i in 0..3 {
            round.process_transaction(&agents.sign(i, &ResetPayload { period_count: 5 })).unwrap();
        }

        let (next, event) = round.end_block().unwrap().unwrap();
        assert_eq!(event, DemoEvent::Done);
        assert_eq!(next.period_count(), 5);
        assert_eq!(next.participants(), round.synchronized_data().participants());
        assert_eq!(next.get_strict::<String>(FINAL_TX_HASH), Ok("0xbeef".to_string()));
        assert_eq!(next.get(MOST_VOTED_TX_HASH), None);
    }

    #[test]
    fn select_keeper_without_majority() {
        let agents = TestAgents::new(4);
        let data = agents.synchronized_data();
        let mut round = AbstractRound::<SelectKeeperRound>::new(data.clone(), ConsensusParams::new(4));
        for i in 0..3 {
            round
                .process_transaction(&agents.sign(i, &SelectKeeperPayload { keeper: agents.address(i) }))
                .unwrap();
        }
        assert_eq!(round.end_block(), Ok(Some((data, DemoEvent::NoMajority))));
    }
}
