use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::LedgerApis;
use crate::error::{AbciAppError, CodecError};
use crate::payload::{BaseTxPayload, PayloadRegistry};

/// A signed payload, the unit of input delivered to the ephemeral chain of a
/// period.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    payload: BaseTxPayload,
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct EncodedTransaction {
    payload: Value,
    signature: String,
}

impl Transaction {
    pub fn new(payload: BaseTxPayload, signature: Vec<u8>) -> Self {
        Transaction { payload, signature }
    }

    pub fn payload(&self) -> &BaseTxPayload {
        &self.payload
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let encoded = EncodedTransaction {
            payload: self.payload.to_json()?,
            signature: hex::encode(&self.signature),
        };
        Ok(serde_json::to_vec(&encoded)?)
    }

    pub fn decode(bytes: &[u8], registry: &PayloadRegistry) -> Result<Self, CodecError> {
        let encoded: EncodedTransaction = serde_json::from_slice(bytes)?;
        Ok(Transaction {
            payload: registry.from_json(encoded.payload)?,
            signature: hex::decode(encoded.signature)?,
        })
    }

    /// Check that the signature was produced by the payload sender over the
    /// encoded payload.
    ///
    /// # Params
    /// - ledger_id: the ledger whose signature scheme produced the signature
    /// - ledger_apis: the available signature schemes
    pub fn verify(&self, ledger_id: &str, ledger_apis: &LedgerApis) -> Result<(), AbciAppError> {
        let message = self
            .payload
            .encode()
            .map_err(|e| AbciAppError::SignatureNotValid(e.to_string()))?;
        let addresses = ledger_apis.recover_message(ledger_id, &message, &self.signature)?;
        if !addresses.contains(self.payload.sender()) {
            return Err(AbciAppError::SignatureNotValid("signature not valid.".to_string()));
        }
        Ok(())
    }
}
