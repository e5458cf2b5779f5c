//! Broker-side error model.

use serde::{Deserialize, Serialize};

/// Failure reported by a broker channel operation.
///
/// The engine never retries on these; it classifies them into
/// subscription, acknowledgment, or shutdown failures and propagates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum BrokerError {
    /// The channel or its connection is already closed.
    #[error("channel closed")]
    Closed,

    /// The broker refused the operation (e.g. unknown queue, unknown tag).
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// Transport-level failure while talking to the broker.
    #[error("broker i/o: {0}")]
    Io(String),
}

impl BrokerError {
    /// Whether the error means the channel can no longer be used at all.
    #[must_use]
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_displays() {
        assert_eq!(BrokerError::Closed.to_string(), "channel closed");
        assert!(BrokerError::Closed.is_channel_closed());
    }

    #[test]
    fn rejected_carries_reason() {
        let err = BrokerError::Rejected("NOT_FOUND - no queue 'orders'".into());
        assert!(err.to_string().contains("no queue 'orders'"));
        assert!(!err.is_channel_closed());
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(BrokerError::Io("reset".into())).unwrap();
        assert_eq!(json["kind"], "io");
        assert_eq!(json["message"], "reset");
    }
}
