//! Consumer configuration model.

use std::collections::BTreeMap;
use std::time::Duration;

use queuebyte_types::AckMode;
use serde::{Deserialize, Serialize};

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;

/// Top-level consumer definition, as parsed from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub version: String,
    /// Consumer name used in logs.
    pub consumer: String,
    pub queue: String,
    #[serde(default)]
    pub mode: AckMode,
    /// Maximum number of records per session; 0 means unbounded.
    #[serde(default)]
    pub limit: u64,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Leave auto-ack deliveries unacknowledged so the broker requeues
    /// them when the channel closes.
    #[serde(default)]
    pub requeue_on_close: bool,
    #[serde(default)]
    pub record: RecordLayout,
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

impl ConsumerConfig {
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// The configured limit, with 0 mapped to `None`.
    #[must_use]
    pub fn effective_limit(&self) -> Option<u64> {
        (self.limit > 0).then_some(self.limit)
    }
}

/// Largest record width a consumer may configure.
pub const MAX_RECORD_WIDTH: usize = 4096;

/// Which output slot each delivery field lands in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    /// Record width. Defaults to one past the highest mapped slot.
    #[serde(default)]
    pub width: Option<usize>,
    #[serde(default)]
    pub body_slot: usize,
    #[serde(default)]
    pub routing_slot: Option<usize>,
    #[serde(default)]
    pub tag_slot: Option<usize>,
    /// Header name to slot. Headers not listed here are dropped.
    #[serde(default)]
    pub headers: BTreeMap<String, usize>,
}

impl RecordLayout {
    /// Every mapped slot paired with the field it holds.
    #[must_use]
    pub fn assignments(&self) -> Vec<(String, usize)> {
        let mut out = vec![("body".to_string(), self.body_slot)];
        if let Some(slot) = self.routing_slot {
            out.push(("routing_key".to_string(), slot));
        }
        if let Some(slot) = self.tag_slot {
            out.push(("delivery_tag".to_string(), slot));
        }
        out.extend(
            self.headers
                .iter()
                .map(|(name, slot)| (format!("header:{name}"), *slot)),
        );
        out
    }

    #[must_use]
    pub fn resolved_width(&self) -> usize {
        self.width.unwrap_or_else(|| {
            self.assignments()
                .iter()
                .map(|(_, slot)| slot.saturating_add(1))
                .max()
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_defaults_to_highest_slot() {
        let mut layout = RecordLayout {
            routing_slot: Some(1),
            tag_slot: Some(4),
            ..RecordLayout::default()
        };
        assert_eq!(layout.resolved_width(), 5);
        layout.width = Some(8);
        assert_eq!(layout.resolved_width(), 8);
    }

    #[test]
    fn resolved_width_saturates_on_huge_slot() {
        let layout = RecordLayout {
            tag_slot: Some(usize::MAX),
            ..RecordLayout::default()
        };
        assert_eq!(layout.resolved_width(), usize::MAX);
    }

    #[test]
    fn default_layout_holds_body_only() {
        let layout = RecordLayout::default();
        assert_eq!(layout.resolved_width(), 1);
        assert_eq!(layout.assignments(), vec![("body".to_string(), 0)]);
    }

    #[test]
    fn zero_limit_is_unbounded() {
        let config: ConsumerConfig =
            serde_yaml::from_str("version: '1.0'\nconsumer: c\nqueue: q\n").unwrap();
        assert_eq!(config.effective_limit(), None);
        assert_eq!(config.mode, AckMode::AutoAck);
        assert_eq!(config.wait_timeout(), Duration::from_millis(5_000));
    }
}
