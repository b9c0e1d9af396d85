use std::collections::HashMap;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::AbciAppError;
use crate::Address;

/// Ledger id of [`Ed25519Scheme`].
pub const ED25519_LEDGER_ID: &str = "ed25519";

const PUBLIC_KEY_LENGTH: usize = 32;
const SIGNATURE_LENGTH: usize = 64;

/// Recovery of signer addresses for one ledger's signature format.
pub trait SignatureScheme: Send + Sync {
    /// Return the addresses that may have produced `signature` over `message`.
    fn recover_message(&self, message: &[u8], signature: &[u8]) -> Result<Vec<Address>, AbciAppError>;
}

/// Signature schemes indexed by ledger id.
#[derive(Default)]
pub struct LedgerApis {
    schemes: HashMap<String, Box<dyn SignatureScheme>>,
}

impl LedgerApis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ledger_id: impl Into<String>, scheme: impl SignatureScheme + 'static) {
        self.schemes.insert(ledger_id.into(), Box::new(scheme));
    }

    pub fn with_scheme(mut self, ledger_id: impl Into<String>, scheme: impl SignatureScheme + 'static) -> Self {
        self.register(ledger_id, scheme);
        self
    }

    pub fn recover_message(
        &self,
        ledger_id: &str,
        message: &[u8],
        signature: &[u8],
    ) -> Result<Vec<Address>, AbciAppError> {
        self.schemes
            .get(ledger_id)
            .ok_or_else(|| AbciAppError::SignatureNotValid(format!("ledger '{}' is not supported", ledger_id)))?
            .recover_message(message, signature)
    }
}

/// Ed25519 signatures.
///
/// An address is the hex encoding of a verifying key. Since Ed25519 does not
/// support public key recovery, a signature carries the verifying key of the
/// signer followed by the 64 signature bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Scheme;

impl Ed25519Scheme {
    pub fn address(key: &VerifyingKey) -> Address {
        hex::encode(key.as_bytes())
    }

    pub fn sign(key: &SigningKey, message: &[u8]) -> Vec<u8> {
        let mut signature = Vec::with_capacity(PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH);
        signature.extend_from_slice(key.verifying_key().as_bytes());
        signature.extend_from_slice(&key.sign(message).to_bytes());
        signature
    }
}

impl SignatureScheme for Ed25519Scheme {
    fn recover_message(&self, message: &[u8], signature: &[u8]) -> Result<Vec<Address>, AbciAppError> {
        if signature.len() != PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH {
            return Err(AbciAppError::SignatureNotValid(format!(
                "expected {} signature bytes, got {}",
                PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH,
                signature.len()
            )));
        }
        let (key_bytes, signature_bytes) = signature.split_at(PUBLIC_KEY_LENGTH);

        let key_bytes: [u8; PUBLIC_KEY_LENGTH] = key_bytes
            .try_into()
            .map_err(|_| AbciAppError::SignatureNotValid("malformed verifying key".to_string()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| AbciAppError::SignatureNotValid(e.to_string()))?;
        let signature = Signature::from_slice(signature_bytes)
            .map_err(|e| AbciAppError::SignatureNotValid(e.to_string()))?;

        key.verify(message, &signature)
            .map_err(|e| AbciAppError::SignatureNotValid(e.to_string()))?;
        Ok(vec![Self::address(&key)])
    }
}
