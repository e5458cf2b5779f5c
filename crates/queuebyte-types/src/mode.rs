//! Acknowledgment modes.

use serde::{Deserialize, Serialize};

/// How a consumption session resolves the deliveries it hands downstream.
///
/// Fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Each delivery is acknowledged as soon as its record is emitted.
    #[default]
    AutoAck,
    /// Deliveries stay unacknowledged until the host resolves the batch.
    TransactionalBatch,
    /// Downstream decides per delivery; decisions are flushed in bulk.
    ActiveConfirmation,
}

impl AckMode {
    /// Transactional modes defer resolution to the batch hooks.
    #[must_use]
    pub fn is_transactional(self) -> bool {
        matches!(self, Self::TransactionalBatch | Self::ActiveConfirmation)
    }

    /// Stable snake_case name, as used in configuration.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AutoAck => "auto_ack",
            Self::TransactionalBatch => "transactional_batch",
            Self::ActiveConfirmation => "active_confirmation",
        }
    }
}

impl std::fmt::Display for AckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
