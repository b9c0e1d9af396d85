use std::marker::PhantomData;

use derivative::Derivative;

use abci_round_core::{AbciAppError, ConsensusParams, SynchronizedData, Transaction, TransactionType};

use crate::aggregation::{Aggregation, Decision, RoundContext};

/// What a round yields once it is done: the state handed to the next round
/// and the event selecting it.
pub type RoundResult<E> = (SynchronizedData, E);

/// One stage of an application's state machine, as seen by the
/// [`crate::abci_app::AbciApp`] driving it.
pub trait Round<E> {
    fn round_id(&self) -> &'static str;

    /// The only transaction type this round accepts, if any.
    fn allowed_tx_type(&self) -> Option<TransactionType>;

    /// The state this round started from.
    fn synchronized_data(&self) -> &SynchronizedData;

    /// Check, without side effects, that a transaction can be applied to the
    /// round.
    fn check_transaction(&self, transaction: &Transaction) -> Result<(), AbciAppError>;

    /// Apply a transaction to the round. Only transactions that passed
    /// [`Round::check_transaction`] are expected here, so any rejection is
    /// reported as an internal error.
    fn process_transaction(&mut self, transaction: &Transaction) -> Result<(), AbciAppError>;

    /// Decide, at the end of a block, whether the round is done.
    ///
    /// # Returns
    /// `None` while the round needs more blocks, otherwise the new state and
    /// the event to emit. Calling it again without new payloads yields the
    /// same answer.
    fn end_block(&self) -> Result<Option<RoundResult<E>>, AbciAppError>;
}

/// The application-specific part of a round: its identity, the payloads it
/// accepts and how it turns a decision of its [`Aggregation`] into an event.
pub trait RoundBehaviour: Sized + 'static {
    type Event: Copy + 'static;
    type Aggregation: Aggregation;

    const ROUND_ID: &'static str;
    const ALLOWED_TX_TYPE: Option<&'static str>;
    /// Name of the payload attribute the aggregation looks at.
    const PAYLOAD_ATTRIBUTE: &'static str = "";

    fn end_block(round: &AbstractRound<Self>) -> Result<Option<RoundResult<Self::Event>>, AbciAppError>;
}

/// A round built from a [`RoundBehaviour`] and its aggregation strategy.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct AbstractRound<B: RoundBehaviour> {
    synchronized_data: SynchronizedData,
    consensus_params: ConsensusParams,
    aggregation: B::Aggregation,
    behaviour: PhantomData<B>,
}

impl<B: RoundBehaviour> AbstractRound<B> {
    pub fn new(synchronized_data: SynchronizedData, consensus_params: ConsensusParams) -> Self {
        AbstractRound {
            synchronized_data,
            consensus_params,
            aggregation: B::Aggregation::default(),
            behaviour: PhantomData,
        }
    }

    pub fn boxed(synchronized_data: SynchronizedData, consensus_params: ConsensusParams) -> Box<dyn Round<B::Event>> {
        Box::new(Self::new(synchronized_data, consensus_params))
    }

    pub fn synchronized_data(&self) -> &SynchronizedData {
        &self.synchronized_data
    }

    pub fn consensus_params(&self) -> &ConsensusParams {
        &self.consensus_params
    }

    pub fn aggregation(&self) -> &B::Aggregation {
        &self.aggregation
    }

    pub fn context(&self) -> RoundContext<'_> {
        RoundContext {
            round_id: B::ROUND_ID,
            payload_attribute: B::PAYLOAD_ATTRIBUTE,
            data: &self.synchronized_data,
            params: &self.consensus_params,
        }
    }

    pub fn decide(&self) -> Decision<<B::Aggregation as Aggregation>::Outcome> {
        self.aggregation.decide(&self.context())
    }

    fn check_allowed_tx_type(&self, transaction: &Transaction) -> Result<(), AbciAppError> {
        let tx_type = transaction.payload().transaction_type();
        match B::ALLOWED_TX_TYPE {
            None => Err(AbciAppError::TransactionTypeNotRecognized(
                "current round does not allow transactions".to_string(),
            )),
            Some(allowed) if tx_type.as_str() != allowed => Err(AbciAppError::TransactionTypeNotRecognized(format!(
                "request '{}' not recognized; only {} is supported",
                tx_type, allowed
            ))),
            Some(_) => Ok(()),
        }
    }
}

impl<B: RoundBehaviour> Round<B::Event> for AbstractRound<B> {
    fn round_id(&self) -> &'static str {
        B::ROUND_ID
    }

    fn allowed_tx_type(&self) -> Option<TransactionType> {
        B::ALLOWED_TX_TYPE.map(TransactionType::from_static)
    }

    fn synchronized_data(&self) -> &SynchronizedData {
        &self.synchronized_data
    }

    fn check_transaction(&self, transaction: &Transaction) -> Result<(), AbciAppError> {
        self.check_allowed_tx_type(transaction)?;
        self.aggregation.check_payload(&self.context(), transaction.payload())?;
        Ok(())
    }

    fn process_transaction(&mut self, transaction: &Transaction) -> Result<(), AbciAppError> {
        self.check_allowed_tx_type(transaction)
            .map_err(|e| AbciAppError::Internal(e.to_string()))?;

        let ctx = RoundContext {
            round_id: B::ROUND_ID,
            payload_attribute: B::PAYLOAD_ATTRIBUTE,
            data: &self.synchronized_data,
            params: &self.consensus_params,
        };
        self.aggregation
            .process_payload(&ctx, transaction.payload())
            .map_err(|rejection| AbciAppError::Internal(rejection.to_string()))
    }

    fn end_block(&self) -> Result<Option<RoundResult<B::Event>>, AbciAppError> {
        B::end_block(self)
    }
}
