use std::path::Path;

use anyhow::{Context, Result};

use queuebyte_engine::config::{parser, validator, ConsumerConfig};

/// Execute the `check` command: parse and validate a consumer file.
pub fn execute(consumer_path: &Path) -> Result<()> {
    let config = parser::parse_consumer(consumer_path)
        .with_context(|| format!("Failed to parse consumer: {}", consumer_path.display()))?;

    validator::validate_consumer(&config)?;
    println!("Consumer structure: OK");

    for warning in validator::consumer_warnings(&config) {
        tracing::warn!(consumer = config.consumer, "{warning}");
        println!("  warning: {warning}");
    }

    print!("{}", describe(&config));
    Ok(())
}

fn describe(config: &ConsumerConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:18} {}\n", "Consumer:", config.consumer));
    out.push_str(&format!("{:18} {}\n", "Queue:", config.queue));
    out.push_str(&format!("{:18} {}\n", "Mode:", config.mode));
    match config.effective_limit() {
        Some(limit) => out.push_str(&format!("{:18} {}\n", "Limit:", limit)),
        None => out.push_str(&format!("{:18} unbounded\n", "Limit:")),
    }
    out.push_str(&format!("{:18} {}ms\n", "Wait timeout:", config.wait_timeout_ms));
    out.push_str(&format!(
        "{:18} {}\n",
        "Record width:",
        config.record.resolved_width()
    ));

    let mut assignments = config.record.assignments();
    assignments.sort_by_key(|(_, slot)| *slot);
    for (label, slot) in assignments {
        out.push_str(&format!("  slot {slot}: {label}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_lists_slots_in_order() {
        let config = parser::parse_consumer_str(
            r#"
version: "1.0"
consumer: orders
queue: orders.in
mode: active_confirmation
limit: 10
record:
  body_slot: 2
  tag_slot: 0
  headers:
    x-trace-id: 1
"#,
        )
        .unwrap();

        let text = describe(&config);

        assert!(text.contains("active_confirmation"));
        assert!(text.contains("Record width:      3"));
        let tag = text.find("slot 0: delivery_tag").unwrap();
        let header = text.find("slot 1: header:x-trace-id").unwrap();
        let body = text.find("slot 2: body").unwrap();
        assert!(tag < header && header < body);
    }

    #[test]
    fn execute_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consumer.yaml");
        std::fs::write(&path, "version: '2.0'\nconsumer: c\nqueue: q\n").unwrap();

        let err = execute(&path).unwrap_err();
        assert!(format!("{err:#}").contains("version"));
    }
}
