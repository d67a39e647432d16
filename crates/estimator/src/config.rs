use serde::{Deserialize, Serialize};

/// Ledger limit for one serialized transaction (signatures + message).
pub const PACKET_DATA_SIZE: usize = 1232;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeBudget {
    /// Upper bound for the full wire transaction.
    pub max_tx_bytes: usize,
    /// Bytes held back from `max_tx_bytes`.
    pub bytes_slack: usize,
}

impl SizeBudget {
    pub fn limit(&self) -> usize {
        self.max_tx_bytes.min(PACKET_DATA_SIZE).saturating_sub(self.bytes_slack)
    }
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self { max_tx_bytes: PACKET_DATA_SIZE, bytes_slack: 0 }
    }
}
