use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use queuebyte_engine::config::{parser, validator};
use queuebyte_engine::{
    BrokerChannel, ConsumptionProcessor, CycleOutcome, MemoryBroker, RowSink, SessionSummary,
};
use queuebyte_types::{AckMode, Headers, OutputRecord};

/// Downstream decision applied to each record in active-confirmation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Confirm {
    Ack,
    Reject,
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
struct ReplayMessage {
    #[serde(default)]
    routing_key: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    headers: Option<Headers>,
}

/// Writes every record as one JSON line.
struct JsonLinesSink<W: Write> {
    out: W,
    inputs: u64,
}

impl<W: Write> RowSink for JsonLinesSink<W> {
    fn emit(&mut self, record: OutputRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, &record).context("Failed to encode record")?;
        writeln!(self.out).context("Failed to write record")?;
        Ok(())
    }

    fn increment_input_count(&mut self) {
        self.inputs += 1;
    }
}

/// Execute the `replay` command.
pub async fn execute(
    consumer_path: &Path,
    messages_path: &Path,
    confirm: Confirm,
    fail_batch: bool,
) -> Result<()> {
    let config = parser::parse_consumer(consumer_path)
        .with_context(|| format!("Failed to parse consumer: {}", consumer_path.display()))?;
    validator::validate_consumer(&config)?;

    let messages = read_messages(messages_path)?;
    tracing::info!(
        consumer = config.consumer,
        queue = config.queue,
        mode = %config.mode,
        messages = messages.len(),
        "Replaying messages"
    );

    let broker = Arc::new(MemoryBroker::new());
    load_messages(&broker, &config.queue, messages)?;
    let channel: Arc<dyn BrokerChannel> = broker;
    let mut processor = ConsumptionProcessor::from_config(&config, channel);
    let cancel = processor.cancel_handle();

    let mut worker = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut sink = JsonLinesSink {
            out: stdout.lock(),
            inputs: 0,
        };
        let result = drive(&mut processor, &mut sink, confirm, fail_batch);
        tracing::debug!(inputs = sink.inputs, "Record sink closed");
        result
    });

    let joined = tokio::select! {
        joined = &mut worker => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; cancelling subscription");
            cancel.cancel();
            worker.await
        }
    };
    let summary = joined.map_err(|e| anyhow::anyhow!("Replay task panicked: {e}"))??;

    eprintln!("Consumer '{}' finished.", config.consumer);
    eprintln!("  Received:  {}", summary.count);
    eprintln!("  Acked:     {}", summary.acked);
    eprintln!("  Rejected:  {}", summary.rejected);
    eprintln!("  Requeued:  {}", summary.requeued);
    println!("{}", summary_line(&summary)?);
    Ok(())
}

fn read_messages(path: &Path) -> Result<Vec<ReplayMessage>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open messages file: {}", path.display()))?;
    let mut messages = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let message: ReplayMessage = serde_json::from_str(&line)
            .with_context(|| format!("Invalid message on line {}", index + 1))?;
        messages.push(message);
    }
    Ok(messages)
}

fn load_messages(broker: &MemoryBroker, queue: &str, messages: Vec<ReplayMessage>) -> Result<()> {
    broker.declare_queue(queue);
    for message in messages {
        broker
            .publish_with_headers(queue, &message.routing_key, message.body, message.headers)
            .with_context(|| format!("Failed to publish to queue '{queue}'"))?;
    }
    Ok(())
}

/// Run the session and always shut it down, returning the first error.
fn drive(
    processor: &mut ConsumptionProcessor,
    sink: &mut dyn RowSink,
    confirm: Confirm,
    fail_batch: bool,
) -> Result<SessionSummary> {
    let consumed = consume(processor, sink, confirm, fail_batch);
    let summary = processor.shutdown();
    if let (Err(_), Err(e)) = (&consumed, &summary) {
        tracing::warn!(error = %e, "Shutdown flush failed after an earlier error");
    }
    consumed?;
    Ok(summary?)
}

/// Pull until the processor stops, then resolve the batch.
fn consume(
    processor: &mut ConsumptionProcessor,
    sink: &mut dyn RowSink,
    confirm: Confirm,
    fail_batch: bool,
) -> Result<()> {
    processor.start()?;

    let mode = processor.session().mode();
    let mut failure: Option<anyhow::Error> = None;
    loop {
        let outcome = match processor.process_one(sink) {
            Ok(outcome) => outcome,
            Err(e) => {
                failure = Some(e.into());
                break;
            }
        };
        if mode == AckMode::ActiveConfirmation {
            if let Err(e) = confirm_awaiting(processor, confirm) {
                failure = Some(e);
                break;
            }
        }
        if outcome != CycleOutcome::Continue {
            break;
        }
    }

    match failure {
        Some(e) => {
            processor.on_failure();
            Err(e)
        }
        None if fail_batch => {
            processor.on_failure();
            Ok(())
        }
        None => Ok(processor.on_success()?),
    }
}

/// Machine-readable summary, printed after the records.
fn summary_line(summary: &SessionSummary) -> Result<String> {
    serde_json::to_string(&serde_json::json!({ "summary": summary }))
        .context("Failed to encode summary")
}

fn confirm_awaiting(processor: &mut ConsumptionProcessor, confirm: Confirm) -> Result<()> {
    let awaiting: Vec<_> = processor
        .session()
        .awaiting_confirmation()
        .iter()
        .copied()
        .collect();
    for tag in awaiting {
        match confirm {
            Confirm::Ack => processor.confirm_ack(tag)?,
            Confirm::Reject => processor.confirm_reject(tag)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuebyte_engine::config::parser::parse_consumer_str;
    use queuebyte_engine::config::ConsumerConfig;
    use queuebyte_engine::ProcessorState;
    use queuebyte_types::DeliveryTag;

    fn consumer(mode: &str, limit: u64) -> ConsumerConfig {
        parse_consumer_str(&format!(
            r#"
version: "1.0"
consumer: replay
queue: orders
mode: {mode}
limit: {limit}
wait_timeout_ms: 20
record:
  body_slot: 0
  tag_slot: 1
  headers:
    x-trace-id: 2
"#
        ))
        .unwrap()
    }

    fn processor_for(
        config: &ConsumerConfig,
        lines: &str,
    ) -> (Arc<MemoryBroker>, ConsumptionProcessor) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(&path, lines).unwrap();

        let broker = Arc::new(MemoryBroker::new());
        load_messages(&broker, &config.queue, read_messages(&path).unwrap()).unwrap();
        let channel: Arc<dyn BrokerChannel> = broker.clone();
        (broker, ConsumptionProcessor::from_config(config, channel))
    }

    fn replay(
        config: &ConsumerConfig,
        lines: &str,
        confirm: Confirm,
        fail_batch: bool,
    ) -> (Result<SessionSummary>, String) {
        let (_broker, mut processor) = processor_for(config, lines);
        let mut sink = JsonLinesSink {
            out: Vec::new(),
            inputs: 0,
        };
        let result = drive(&mut processor, &mut sink, confirm, fail_batch);
        assert_eq!(sink.inputs, result.as_ref().map_or(0, |s| s.count));
        (result, String::from_utf8(sink.out).unwrap())
    }

    const MESSAGES: &str = concat!(
        r#"{"routing_key": "orders.created", "body": "a", "headers": {"x-trace-id": "t-1"}}"#,
        "\n\n",
        r#"{"body": "b"}"#,
        "\n",
        r#"{"body": "c", "headers": {"x-trace-id": null}}"#,
        "\n",
    );

    #[test]
    fn batch_replay_prints_records_and_acks_all() {
        let config = consumer("transactional_batch", 0);
        let (result, out) = replay(&config, MESSAGES, Confirm::Ack, false);
        let summary = result.unwrap();

        assert_eq!(
            out.lines().collect::<Vec<_>>(),
            vec![r#"["a",1,"t-1"]"#, r#"["b",2,null]"#, r#"["c",3,null]"#]
        );
        assert_eq!((summary.count, summary.acked, summary.requeued), (3, 3, 0));
    }

    #[test]
    fn failed_batch_requeues_everything() {
        let config = consumer("transactional_batch", 0);
        let (result, _) = replay(&config, MESSAGES, Confirm::Ack, true);
        let summary = result.unwrap();
        assert_eq!((summary.acked, summary.requeued), (0, 3));
    }

    #[test]
    fn active_confirmation_rejects_on_request() {
        let config = consumer("active_confirmation", 2);
        let (result, _) = replay(&config, MESSAGES, Confirm::Reject, false);
        let summary = result.unwrap();
        assert_eq!(
            (summary.count, summary.acked, summary.rejected, summary.requeued),
            (2, 0, 2, 0)
        );
    }

    #[test]
    fn failed_commit_still_shuts_down() {
        let config = consumer("transactional_batch", 0);
        let (broker, mut processor) = processor_for(&config, MESSAGES);
        broker.fail_next_ack(DeliveryTag::new(3));
        let mut sink = JsonLinesSink {
            out: Vec::new(),
            inputs: 0,
        };

        let err = drive(&mut processor, &mut sink, Confirm::Ack, false).unwrap_err();

        assert!(err.to_string().contains("delivery 3"));
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(processor.session().summary().requeued, 3);
    }

    #[test]
    fn failed_auto_ack_ends_replay_and_shuts_down() {
        let config = consumer("auto_ack", 0);
        let (broker, mut processor) = processor_for(&config, MESSAGES);
        broker.fail_next_ack(DeliveryTag::new(1));
        let mut sink = JsonLinesSink {
            out: Vec::new(),
            inputs: 0,
        };

        assert!(drive(&mut processor, &mut sink, Confirm::Ack, false).is_err());

        assert_eq!(sink.inputs, 1);
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(processor.state(), ProcessorState::Failed);
    }

    #[test]
    fn summary_line_is_json() {
        let config = consumer("transactional_batch", 0);
        let (result, _) = replay(&config, MESSAGES, Confirm::Ack, false);
        let line = summary_line(&result.unwrap()).unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["summary"]["count"], 3);
        assert_eq!(value["summary"]["acked"], 3);
        assert_eq!(value["summary"]["requeued"], 0);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        std::fs::write(&path, "{\"body\": \"ok\"}\nnot json\n").unwrap();

        let err = read_messages(&path).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
