use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// The minimum number of equal votes out of `n` that guarantees no other value
/// can also reach the threshold, assuming fewer than `n / 3` faulty participants.
///
/// This is `ceil((2n + 1) / 3)`.
pub fn consensus_threshold(n: usize) -> usize {
    (2 * n + 1 + 2) / 3
}

/// Consensus parameters
///
/// Static sizing of the committee running a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Number of agents expected to take part in a period.
    max_participants: usize,
}

impl ConsensusParams {
    pub fn new(max_participants: usize) -> Self {
        ConsensusParams { max_participants }
    }

    /// Build the parameters from a JSON object holding a non-negative integer
    /// `max_participants` field.
    pub fn from_json(obj: &Value) -> Result<Self, ConfigError> {
        let max_participants = obj
            .get("max_participants")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ConfigError::InvalidConsensusParams(
                    "max_participants must be an integer greater than 0.".to_string(),
                )
            })?;
        Ok(ConsensusParams::new(max_participants as usize))
    }

    pub fn max_participants(&self) -> usize {
        self.max_participants
    }

    pub fn consensus_threshold(&self) -> usize {
        consensus_threshold(self.max_participants)
    }
}
