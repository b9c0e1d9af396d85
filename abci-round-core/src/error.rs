use thiserror::Error;

use crate::{Address, BlockHeight};

/// Errors raised by the round engine while it processes blocks and transactions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbciAppError {
    /// The signature of a transaction does not recover to the payload sender.
    #[error("signature not valid: {0}")]
    SignatureNotValid(String),

    /// A block was appended at the wrong height.
    #[error("expected height {expected}, got {actual}")]
    AddBlock {
        expected: BlockHeight,
        actual: BlockHeight,
    },

    /// An invariant of the engine was violated. This always points to a bug in
    /// the caller (e.g. the ABCI calls were issued out of order) or in the
    /// application's round definitions.
    #[error("internal error: {0}")]
    Internal(String),

    /// The transaction type is not the one accepted by the current round.
    #[error("{0}")]
    TransactionTypeNotRecognized(String),

    /// The payload of the transaction cannot be applied to the current round.
    #[error(transparent)]
    TransactionNotValid(#[from] PayloadRejection),

    /// Even if every missing vote went to the most voted value, the quorum
    /// could not be reached any more.
    #[error(
        "cannot reach quorum={quorum}, number of remaining votes={remaining}, \
         number of most voted item's votes={largest}"
    )]
    NoMajorityPossible {
        quorum: usize,
        remaining: usize,
        largest: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AbciAppError {
    pub fn internal(message: impl Into<String>) -> Self {
        AbciAppError::Internal(message.into())
    }
}

/// Reason for which a payload was not admitted into a round.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadRejection {
    #[error("{sender} not in list of participants: {participants:?}")]
    NotParticipant {
        sender: Address,
        participants: Vec<Address>,
    },

    #[error("sender {sender} has already sent value for round: {round_id}")]
    AlreadySent { sender: Address, round_id: String },

    #[error("payload attribute {attribute} with value {value} has already been added for round: {round_id}")]
    DuplicateValue {
        attribute: String,
        value: String,
        round_id: String,
    },

    #[error("payload has no attribute '{0}'")]
    MissingAttribute(String),

    #[error("{0} not elected as keeper.")]
    NotKeeper(Address),

    #[error("keeper payload value already set.")]
    KeeperAlreadySent,

    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors reading fields of a [`crate::SynchronizedData`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("'participants' field is None")]
    ParticipantsNotSet,

    #[error("'{0}' field is not set")]
    MissingField(String),

    #[error("'{key}' field cannot be read: {reason}")]
    InvalidField { key: String, reason: String },
}

/// Misconfiguration of an application. These are detected while the
/// application is assembled and must abort startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("transaction type with name {transaction_type} already used by {existing}, and cannot be used by {new}")]
    DuplicateTransactionType {
        transaction_type: String,
        existing: String,
        new: String,
    },

    #[error("payload type {payload_type} is already registered with transaction type {transaction_type}")]
    PayloadTypeAlreadyRegistered {
        payload_type: String,
        transaction_type: String,
    },

    #[error("invalid consensus params: {0}")]
    InvalidConsensusParams(String),

    #[error("initial round {initial} is not in the set of rounds: {states}")]
    InitialRoundNotAState { initial: String, states: String },

    #[error("initial round {0} does not have outgoing transitions")]
    InitialRoundWithoutTransitions(String),

    #[error("initial round {initial} has timeout events in outgoing transitions: {events}")]
    InitialRoundWithTimeouts { initial: String, events: String },

    #[error("final state {0} has outgoing transitions")]
    FinalStateWithTransitions(String),
}

/// Errors encoding or decoding payloads and transactions.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),

    #[error("transaction type '{0}' is not registered")]
    UnknownTransactionType(String),

    #[error("payload of type '{0}' does not serialize to a JSON object")]
    PayloadNotAnObject(String),

    #[error("payload of type '{transaction_type}' has a field named '{field}', which is reserved for the header")]
    ReservedField { transaction_type: String, field: String },
}
