use std::collections::BTreeMap;
use std::fmt::Debug;

use serde_json::Value;

use abci_round_core::{AbciAppError, Address, BaseTxPayload, ConsensusParams, PayloadRejection, SynchronizedData};

use crate::quorum::is_majority_possible;

/// Key of the [`SynchronizedData`] field holding the address of the agent
/// elected as keeper.
pub const MOST_VOTED_KEEPER_ADDRESS: &str = "most_voted_keeper_address";

/// What an aggregation strategy can tell about the payloads it has seen so
/// far.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    /// More payloads are needed.
    Pending,
    /// The decision criterion is met.
    Reached(T),
    /// The decision criterion can no longer be met by the payloads still to
    /// come.
    NoMajority,
}

/// Everything a strategy may read about the round it aggregates payloads for.
#[derive(Debug, Clone, Copy)]
pub struct RoundContext<'a> {
    pub round_id: &'a str,
    pub payload_attribute: &'a str,
    pub data: &'a SynchronizedData,
    pub params: &'a ConsensusParams,
}

impl RoundContext<'_> {
    /// Number of participants of the period, or `max_participants` while the
    /// participants are not known yet.
    fn nb_participants(&self) -> usize {
        self.data.nb_participants().unwrap_or(self.params.max_participants())
    }

    fn attribute(&self, payload: &BaseTxPayload) -> Result<Value, PayloadRejection> {
        payload
            .attribute(self.payload_attribute)
            .ok_or_else(|| PayloadRejection::MissingAttribute(self.payload_attribute.to_string()))
    }

    fn check_participant(&self, sender: &Address) -> Result<(), PayloadRejection> {
        let participants = self.data.participants()?;
        if !participants.contains(sender) {
            return Err(PayloadRejection::NotParticipant {
                sender: sender.clone(),
                participants: participants.iter().cloned().collect(),
            });
        }
        Ok(())
    }
}

/// A policy accumulating the payloads of a round and deciding when the round
/// is done.
///
/// A payload that passes [`Aggregation::check_payload`] must be accepted by
/// [`Aggregation::process_payload`]. Accepted payloads are never removed.
pub trait Aggregation: Default + Debug {
    type Outcome;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection>;

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection>;

    fn decide(&self, ctx: &RoundContext<'_>) -> Decision<Self::Outcome>;
}

/// Canonical form of a payload value, used to count equal values.
fn vote_key(value: &Value) -> String {
    value.to_string()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One payload per participant, keyed by sender.
#[derive(Debug, Default, Clone)]
pub struct Collection {
    payloads: BTreeMap<Address, BaseTxPayload>,
}

impl Collection {
    pub fn payloads(&self) -> &BTreeMap<Address, BaseTxPayload> {
        &self.payloads
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    pub fn contains(&self, sender: &str) -> bool {
        self.payloads.contains_key(sender)
    }

    /// The value of the round's payload attribute sent by each sender.
    pub fn values(&self, ctx: &RoundContext<'_>) -> BTreeMap<&Address, Value> {
        self.payloads
            .iter()
            .filter_map(|(sender, payload)| payload.attribute(ctx.payload_attribute).map(|v| (sender, v)))
            .collect()
    }

    fn votes(&self, ctx: &RoundContext<'_>) -> BTreeMap<&Address, String> {
        self.values(ctx).into_iter().map(|(sender, v)| (sender, vote_key(&v))).collect()
    }
}

impl Aggregation for Collection {
    type Outcome = BTreeMap<Address, BaseTxPayload>;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        ctx.check_participant(payload.sender())?;
        if self.payloads.contains_key(payload.sender()) {
            return Err(PayloadRejection::AlreadySent {
                sender: payload.sender().clone(),
                round_id: ctx.round_id.to_string(),
            });
        }
        Ok(())
    }

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.check_payload(ctx, payload)?;
        self.payloads.insert(payload.sender().clone(), payload.clone());
        Ok(())
    }

    /// Reached once every participant has sent a payload.
    fn decide(&self, ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        if self.payloads.len() >= ctx.nb_participants() {
            Decision::Reached(self.payloads.clone())
        } else {
            Decision::Pending
        }
    }
}

/// Collect the same value from a quorum of participants.
#[derive(Debug, Default, Clone)]
pub struct CollectSameUntilThreshold {
    collection: Collection,
}

impl CollectSameUntilThreshold {
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Votes per distinct value, in canonical order.
    fn counts(&self, ctx: &RoundContext<'_>) -> BTreeMap<String, (usize, Value)> {
        let mut counts: BTreeMap<String, (usize, Value)> = BTreeMap::new();
        for value in self.collection.values(ctx).into_values() {
            counts.entry(vote_key(&value)).or_insert((0, value)).0 += 1;
        }
        counts
    }

    pub fn threshold_reached(&self, ctx: &RoundContext<'_>) -> bool {
        let threshold = ctx.params.consensus_threshold();
        self.counts(ctx).values().any(|(count, _)| *count >= threshold)
    }

    /// The value sent by a quorum of participants.
    pub fn most_voted_payload(&self, ctx: &RoundContext<'_>) -> Result<Value, AbciAppError> {
        let most_voted = self
            .counts(ctx)
            .into_values()
            .fold(None, |best: Option<(usize, Value)>, (count, value)| match best {
                Some((best_count, _)) if best_count >= count => best,
                _ => Some((count, value)),
            });

        match most_voted {
            Some((count, value)) if count >= ctx.params.consensus_threshold() => Ok(value),
            _ => Err(AbciAppError::internal("not enough votes")),
        }
    }
}

impl Aggregation for CollectSameUntilThreshold {
    type Outcome = Value;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.collection.check_payload(ctx, payload)?;
        ctx.attribute(payload).map(|_| ())
    }

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        ctx.attribute(payload)?;
        self.collection.process_payload(ctx, payload)
    }

    fn decide(&self, ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        if let Ok(value) = self.most_voted_payload(ctx) {
            return Decision::Reached(value);
        }
        if !is_majority_possible(&self.collection.votes(ctx), ctx.nb_participants()) {
            return Decision::NoMajority;
        }
        Decision::Pending
    }
}

/// Collect a distinct value from every participant.
///
/// No participant check is made: this is the strategy used to learn who the
/// participants are.
#[derive(Debug, Default, Clone)]
pub struct CollectDifferentUntilAll {
    collection: BTreeMap<String, Value>,
}

impl CollectDifferentUntilAll {
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.collection.values()
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn collection_threshold_reached(&self, ctx: &RoundContext<'_>) -> bool {
        self.collection.len() >= ctx.params.max_participants()
    }
}

impl Aggregation for CollectDifferentUntilAll {
    type Outcome = Vec<Value>;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        let value = ctx.attribute(payload)?;
        if self.collection.contains_key(&vote_key(&value)) {
            return Err(PayloadRejection::DuplicateValue {
                attribute: ctx.payload_attribute.to_string(),
                value: display_value(&value),
                round_id: ctx.round_id.to_string(),
            });
        }
        Ok(())
    }

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.check_payload(ctx, payload)?;
        let value = ctx.attribute(payload)?;
        self.collection.insert(vote_key(&value), value);
        Ok(())
    }

    fn decide(&self, ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        if self.collection_threshold_reached(ctx) {
            Decision::Reached(self.collection.values().cloned().collect())
        } else {
            Decision::Pending
        }
    }
}

/// Collect one payload from each of a quorum of participants; values may
/// differ.
#[derive(Debug, Default, Clone)]
pub struct CollectDifferentUntilThreshold {
    collection: Collection,
}

impl CollectDifferentUntilThreshold {
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_threshold_reached(&self, ctx: &RoundContext<'_>) -> bool {
        self.collection.len() >= ctx.params.consensus_threshold()
    }
}

impl Aggregation for CollectDifferentUntilThreshold {
    type Outcome = BTreeMap<Address, BaseTxPayload>;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.collection.check_payload(ctx, payload)
    }

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.collection.process_payload(ctx, payload)
    }

    fn decide(&self, ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        if self.collection_threshold_reached(ctx) {
            Decision::Reached(self.collection.payloads().clone())
        } else {
            Decision::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Positive,
    Negative,
    /// A quorum voted `null`.
    Abstain,
}

/// Three-way vote on a boolean (or null) payload attribute.
#[derive(Debug, Default, Clone)]
pub struct Voting {
    collection: Collection,
}

impl Voting {
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    fn count(&self, ctx: &RoundContext<'_>, vote: Option<bool>) -> usize {
        let expected = vote.map_or(Value::Null, Value::Bool);
        self.collection.values(ctx).values().filter(|v| **v == expected).count()
    }

    pub fn positive_vote_threshold_reached(&self, ctx: &RoundContext<'_>) -> bool {
        self.count(ctx, Some(true)) >= ctx.params.consensus_threshold()
    }

    pub fn negative_vote_threshold_reached(&self, ctx: &RoundContext<'_>) -> bool {
        self.count(ctx, Some(false)) >= ctx.params.consensus_threshold()
    }

    pub fn none_vote_threshold_reached(&self, ctx: &RoundContext<'_>) -> bool {
        self.count(ctx, None) >= ctx.params.consensus_threshold()
    }
}

impl Aggregation for Voting {
    type Outcome = VoteOutcome;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.collection.check_payload(ctx, payload)?;
        ctx.attribute(payload).map(|_| ())
    }

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        ctx.attribute(payload)?;
        self.collection.process_payload(ctx, payload)
    }

    fn decide(&self, ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        if self.positive_vote_threshold_reached(ctx) {
            Decision::Reached(VoteOutcome::Positive)
        } else if self.negative_vote_threshold_reached(ctx) {
            Decision::Reached(VoteOutcome::Negative)
        } else if self.none_vote_threshold_reached(ctx) {
            Decision::Reached(VoteOutcome::Abstain)
        } else if !is_majority_possible(&self.collection.votes(ctx), ctx.nb_participants()) {
            Decision::NoMajority
        } else {
            Decision::Pending
        }
    }
}

/// Accept a single payload, from the elected keeper.
#[derive(Debug, Default, Clone)]
pub struct OnlyKeeperSends {
    keeper_payload: Option<Value>,
}

impl OnlyKeeperSends {
    pub fn has_keeper_sent_payload(&self) -> bool {
        self.keeper_payload.is_some()
    }

    pub fn keeper_payload(&self) -> Option<&Value> {
        self.keeper_payload.as_ref()
    }
}

impl Aggregation for OnlyKeeperSends {
    type Outcome = Value;

    fn check_payload(&self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        let sender = payload.sender();
        ctx.check_participant(sender)?;

        let keeper: Address = ctx.data.get_strict(MOST_VOTED_KEEPER_ADDRESS)?;
        if *sender != keeper {
            return Err(PayloadRejection::NotKeeper(sender.clone()));
        }
        if self.keeper_payload.is_some() {
            return Err(PayloadRejection::KeeperAlreadySent);
        }
        ctx.attribute(payload).map(|_| ())
    }

    fn process_payload(&mut self, ctx: &RoundContext<'_>, payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        self.check_payload(ctx, payload)?;
        self.keeper_payload = Some(ctx.attribute(payload)?);
        Ok(())
    }

    fn decide(&self, _ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        match &self.keeper_payload {
            Some(value) => Decision::Reached(value.clone()),
            None => Decision::Pending,
        }
    }
}

/// Strategy of rounds that take no payloads at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollection;

impl Aggregation for NoCollection {
    type Outcome = ();

    fn check_payload(&self, _ctx: &RoundContext<'_>, _payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        Ok(())
    }

    fn process_payload(&mut self, _ctx: &RoundContext<'_>, _payload: &BaseTxPayload) -> Result<(), PayloadRejection> {
        Ok(())
    }

    fn decide(&self, _ctx: &RoundContext<'_>) -> Decision<Self::Outcome> {
        Decision::Pending
    }
}
