//! Semantic validation for parsed consumer configuration values.

use std::collections::BTreeMap;

use anyhow::{bail, Result};

use crate::config::types::{ConsumerConfig, RecordLayout, MAX_RECORD_WIDTH};

fn validate_layout(layout: &RecordLayout, errors: &mut Vec<String>) {
    let width = layout.resolved_width();
    if width == 0 {
        errors.push("record.width must be > 0".to_string());
        return;
    }
    if width > MAX_RECORD_WIDTH {
        errors.push(format!(
            "record width {width} exceeds the maximum of {MAX_RECORD_WIDTH}"
        ));
        return;
    }

    let mut owners: BTreeMap<usize, String> = BTreeMap::new();
    for (field, slot) in layout.assignments() {
        if slot >= width {
            errors.push(format!(
                "record: {field} slot {slot} is out of range for width {width}"
            ));
        }
        if let Some(existing) = owners.get(&slot) {
            errors.push(format!(
                "record: slot {slot} is assigned to both {existing} and {field}"
            ));
        } else {
            owners.insert(slot, field);
        }
    }

    for name in layout.headers.keys() {
        if name.trim().is_empty() {
            errors.push("record: header names must not be empty".to_string());
        }
    }
}

/// Validate a parsed consumer configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_consumer(config: &ConsumerConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported consumer version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.consumer.trim().is_empty() {
        errors.push("Consumer name must not be empty".to_string());
    }

    if config.queue.trim().is_empty() {
        errors.push("Queue name must not be empty".to_string());
    }

    if config.wait_timeout_ms == 0 {
        errors.push("wait_timeout_ms must be > 0".to_string());
    }

    validate_layout(&config.record, &mut errors);

    if !errors.is_empty() {
        bail!("Consumer validation failed:\n  - {}", errors.join("\n  - "));
    }

    Ok(())
}

/// Non-fatal observations about a valid configuration.
#[must_use]
pub fn consumer_warnings(config: &ConsumerConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.requeue_on_close && config.mode.is_transactional() {
        warnings.push(format!(
            "requeue_on_close has no effect in {} mode; acknowledgments are already deferred",
            config.mode
        ));
    }
    warnings
}
