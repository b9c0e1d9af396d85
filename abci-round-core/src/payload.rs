use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use bimap::BiMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CodecError, ConfigError};
use crate::Address;

/// Tag identifying the concrete kind of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionType(Cow<'static, str>);

impl TransactionType {
    pub const fn from_static(tag: &'static str) -> Self {
        TransactionType(Cow::Borrowed(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransactionType {
    fn from(value: String) -> Self {
        TransactionType(Cow::Owned(value))
    }
}

/// A concrete, typed payload an agent can submit.
///
/// Each implementor is associated with exactly one [`TransactionType`]; the
/// association is checked when the type is added to a [`PayloadRegistry`].
/// Implementors must serialize to a JSON object (a braced struct, possibly
/// without fields).
pub trait TxPayload: Serialize + DeserializeOwned + 'static {
    const TRANSACTION_TYPE: &'static str;

    fn transaction_type() -> TransactionType {
        TransactionType::from_static(Self::TRANSACTION_TYPE)
    }
}

/// Keys of the payload header; payload data may not use them.
pub const RESERVED_FIELDS: [&str; 3] = ["transaction_type", "id_", "sender"];

/// The untyped form of a payload, as carried by a transaction.
///
/// Once built, a payload is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseTxPayload {
    transaction_type: TransactionType,
    #[serde(rename = "id_")]
    id: String,
    sender: Address,
    #[serde(flatten)]
    data: Map<String, Value>,
}

impl BaseTxPayload {
    /// Wrap a typed payload, assigning it a fresh random id.
    pub fn new<P: TxPayload>(sender: impl Into<Address>, payload: &P) -> Result<Self, CodecError> {
        Self::with_id(sender, Uuid::new_v4().simple().to_string(), payload)
    }

    pub fn with_id<P: TxPayload>(
        sender: impl Into<Address>,
        id: impl Into<String>,
        payload: &P,
    ) -> Result<Self, CodecError> {
        let data = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(CodecError::PayloadNotAnObject(P::TRANSACTION_TYPE.to_string())),
        };
        if let Some(field) = RESERVED_FIELDS.iter().find(|field| data.contains_key(**field)) {
            return Err(CodecError::ReservedField {
                transaction_type: P::TRANSACTION_TYPE.to_string(),
                field: field.to_string(),
            });
        }

        Ok(BaseTxPayload {
            transaction_type: P::transaction_type(),
            id: id.into(),
            sender: sender.into(),
            data,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn transaction_type(&self) -> &TransactionType {
        &self.transaction_type
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Return the value of a named attribute of the payload. `sender` and `id_`
    /// resolve to the payload header, any other name to a data field.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "sender" => Some(Value::String(self.sender.clone())),
            "id_" => Some(Value::String(self.id.clone())),
            _ => self.data.get(name).cloned(),
        }
    }

    /// Read the data back as the typed payload `P`.
    pub fn data_as<P: TxPayload>(&self) -> Result<P, CodecError> {
        decode_data::<P>(&self.data)
    }

    pub fn to_json(&self) -> Result<Value, CodecError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn decode_data<P: TxPayload>(data: &Map<String, Value>) -> Result<P, CodecError> {
    match serde_json::from_value::<P>(Value::Object(data.clone())) {
        Ok(payload) => Ok(payload),
        // unit structs serialize to `null` rather than to an empty object
        Err(_) if data.is_empty() => Ok(serde_json::from_value::<P>(Value::Null)?),
        Err(e) => Err(e.into()),
    }
}

fn check_data<P: TxPayload>(data: &Map<String, Value>) -> Result<(), CodecError> {
    decode_data::<P>(data).map(|_| ())
}

type DataCheck = fn(&Map<String, Value>) -> Result<(), CodecError>;

/// Association between transaction types and the payload types that own them.
///
/// The registry is populated explicitly while an application is assembled and
/// is then used to decode payloads received from the network.
#[derive(Default)]
pub struct PayloadRegistry {
    /// Transaction type <-> name of the Rust type owning it
    types: BiMap<TransactionType, &'static str>,
    checks: HashMap<TransactionType, DataCheck>,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the payload type `P`.
    ///
    /// Registering the same type twice is a no-op. A transaction type already
    /// owned by another payload type, or a payload type already registered
    /// under another transaction type, is a configuration error.
    pub fn register<P: TxPayload>(&mut self) -> Result<&mut Self, ConfigError> {
        let transaction_type = P::transaction_type();
        let payload_type = type_name::<P>();

        if let Some(existing) = self.types.get_by_left(&transaction_type) {
            if *existing == payload_type {
                return Ok(self);
            }
            return Err(ConfigError::DuplicateTransactionType {
                transaction_type: transaction_type.to_string(),
                existing: existing.to_string(),
                new: payload_type.to_string(),
            });
        }
        if let Some(existing) = self.types.get_by_right(&payload_type) {
            return Err(ConfigError::PayloadTypeAlreadyRegistered {
                payload_type: payload_type.to_string(),
                transaction_type: existing.to_string(),
            });
        }

        debug!("Registering payload {} for transaction type '{}'", payload_type, transaction_type);
        self.types.insert(transaction_type.clone(), payload_type);
        self.checks.insert(transaction_type, check_data::<P> as DataCheck);
        Ok(self)
    }

    /// Builder flavour of [`PayloadRegistry::register`].
    pub fn with<P: TxPayload>(mut self) -> Result<Self, ConfigError> {
        self.register::<P>()?;
        Ok(self)
    }

    pub fn contains(&self, transaction_type: &TransactionType) -> bool {
        self.types.contains_left(transaction_type)
    }

    pub fn payload_type_name(&self, transaction_type: &TransactionType) -> Option<&'static str> {
        self.types.get_by_left(transaction_type).copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Decode a payload, checking that its data has the shape of the payload
    /// type registered for its transaction type.
    pub fn decode(&self, bytes: &[u8]) -> Result<BaseTxPayload, CodecError> {
        self.from_json(serde_json::from_slice(bytes)?)
    }

    pub fn from_json(&self, value: Value) -> Result<BaseTxPayload, CodecError> {
        let payload: BaseTxPayload = serde_json::from_value(value)?;
        let check = self
            .checks
            .get(&payload.transaction_type)
            .ok_or_else(|| CodecError::UnknownTransactionType(payload.transaction_type.to_string()))?;
        check(&payload.data)?;
        Ok(payload)
    }
}
