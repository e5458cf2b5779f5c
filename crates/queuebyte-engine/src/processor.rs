//! The acknowledgment state machine.
//!
//! A [`ConsumptionProcessor`] pulls one delivery per cycle, maps it into an
//! [`OutputRecord`](queuebyte_types::OutputRecord), hands it to the
//! [`RowSink`], and applies the session's [`AckMode`]:
//!
//! | Mode | Per record | `on_success` | `on_failure` |
//! |------|------------|--------------|--------------|
//! | `AutoAck` | ack (unless `requeue_on_close`) | no-op | no-op |
//! | `TransactionalBatch` | defer | ack through last tag | abandon batch |
//! | `ActiveConfirmation` | await downstream | flush confirmations | forget current tag |
//!
//! Each consumed delivery ends up acked, rejected, or left for the broker
//! to requeue; the processor never resolves a tag twice.

use std::sync::Arc;
use std::time::Duration;

use queuebyte_types::{AckMode, DeliveryTag};

use crate::broker::BrokerChannel;
use crate::config::ConsumerConfig;
use crate::errors::{ConsumerError, Result};
use crate::mapping::SlotMapping;
use crate::session::{ConsumptionSession, SessionSummary};
use crate::sink::RowSink;
use crate::source::{CancelHandle, DeliveryHandle, DeliverySource};

/// Lifecycle state of a processor. `Stopped` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Running,
    /// Cancelled locally; no more deliveries are pulled.
    Draining,
    Failed,
    Stopped,
}

/// What the host should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A record was emitted; more cycles may run.
    Continue,
    /// The wait timed out without a delivery. Polling again is the caller's call.
    NoDelivery,
    /// No further cycles will produce records.
    Finished,
}

/// Session settings derived from configuration.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub mode: AckMode,
    pub limit: Option<u64>,
    pub wait_timeout: Duration,
    pub requeue_on_close: bool,
    pub mapping: SlotMapping,
}

impl ProcessorOptions {
    #[must_use]
    pub fn from_config(config: &ConsumerConfig) -> Self {
        Self {
            mode: config.mode,
            limit: config.effective_limit(),
            wait_timeout: config.wait_timeout(),
            requeue_on_close: config.requeue_on_close,
            mapping: SlotMapping::from_layout(&config.record),
        }
    }
}

/// Drives one consumption session against a broker channel.
pub struct ConsumptionProcessor<S = DeliverySource> {
    channel: Arc<dyn BrokerChannel>,
    source: S,
    mapping: SlotMapping,
    session: ConsumptionSession,
    wait_timeout: Duration,
    requeue_on_close: bool,
    state: ProcessorState,
}

impl ConsumptionProcessor<DeliverySource> {
    /// Build a processor with a [`DeliverySource`] on the configured queue.
    #[must_use]
    pub fn from_config(config: &ConsumerConfig, channel: Arc<dyn BrokerChannel>) -> Self {
        let source = DeliverySource::new(Arc::clone(&channel), config.queue.clone());
        Self::new(channel, source, ProcessorOptions::from_config(config))
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.source.cancel_handle()
    }
}

impl<S: DeliveryHandle> ConsumptionProcessor<S> {
    #[must_use]
    pub fn new(channel: Arc<dyn BrokerChannel>, source: S, options: ProcessorOptions) -> Self {
        Self {
            channel,
            source,
            mapping: options.mapping,
            session: ConsumptionSession::new(options.mode, options.limit),
            wait_timeout: options.wait_timeout,
            requeue_on_close: options.requeue_on_close,
            state: ProcessorState::Running,
        }
    }

    #[must_use]
    pub fn session(&self) -> &ConsumptionSession {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Subscribe to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscription`] if the broker refuses; the
    /// processor is then `Failed`.
    pub fn start(&mut self) -> Result<()> {
        tracing::info!(
            mode = %self.session.mode(),
            limit = self.session.limit().unwrap_or(0),
            wait_timeout_ms = u64::try_from(self.wait_timeout.as_millis()).unwrap_or(u64::MAX),
            "Starting consumption session"
        );
        self.source.start().map_err(|e| self.fail(e))
    }

    /// Run one record-processing cycle.
    ///
    /// # Errors
    ///
    /// Source, sink and auto-ack failures move the processor to `Failed`.
    /// A failed auto-ack is returned as [`ConsumerError::AckBroker`]; the
    /// record stays emitted and its delivery unresolved.
    pub fn process_one(&mut self, sink: &mut dyn RowSink) -> Result<CycleOutcome> {
        if self.state != ProcessorState::Running {
            return Ok(CycleOutcome::Finished);
        }

        let delivery = match self.source.next_delivery(self.wait_timeout) {
            Ok(Some(delivery)) => delivery,
            Ok(None) if self.source.is_cancelled() => {
                tracing::info!(count = self.session.count(), "Source cancelled; draining");
                self.state = ProcessorState::Draining;
                return Ok(CycleOutcome::Finished);
            }
            Ok(None) => return Ok(CycleOutcome::NoDelivery),
            Err(e) => return Err(self.fail(e)),
        };

        let tag = delivery.tag;
        let record = self.mapping.map(delivery);
        if let Err(e) = sink.emit(record) {
            // The delivery was never counted; later bulk acks must not cover it.
            self.session.bulk_ack_safe = false;
            return Err(self.fail(ConsumerError::Sink(e)));
        }
        sink.increment_input_count();
        self.session.record_emitted(tag);

        let acked = self.apply_immediate_policy(tag);

        if self.session.limit_reached() {
            tracing::info!(count = self.session.count(), "Message limit reached");
            self.state = ProcessorState::Stopped;
        }

        if let Err(e) = acked {
            return Err(self.fail(e));
        }
        if self.state == ProcessorState::Stopped {
            Ok(CycleOutcome::Finished)
        } else {
            Ok(CycleOutcome::Continue)
        }
    }

    fn apply_immediate_policy(&mut self, tag: DeliveryTag) -> Result<()> {
        match self.session.mode() {
            AckMode::AutoAck if !self.requeue_on_close => {
                tracing::debug!(tag = %tag, "basic_ack");
                self.channel
                    .basic_ack(tag, false)
                    .map_err(|source| ConsumerError::AckBroker { tag, source })?;
                self.session.acked += 1;
            }
            AckMode::AutoAck => {}
            AckMode::TransactionalBatch => self.session.batch_tags.push_back(tag),
            AckMode::ActiveConfirmation => {
                self.session.awaiting.insert(tag);
            }
        }
        Ok(())
    }

    /// Record a downstream decision to acknowledge `tag` at the next flush.
    ///
    /// # Errors
    ///
    /// [`ConsumerError::NotActiveConfirmation`] outside active-confirmation
    /// mode; [`ConsumerError::UnknownTag`] if `tag` is not awaiting a decision.
    pub fn confirm_ack(&mut self, tag: DeliveryTag) -> Result<()> {
        self.take_awaiting(tag)?;
        self.session.pending_ack.insert(tag);
        Ok(())
    }

    /// Record a downstream decision to reject `tag` (no requeue) at the next flush.
    ///
    /// # Errors
    ///
    /// Same as [`ConsumptionProcessor::confirm_ack`].
    pub fn confirm_reject(&mut self, tag: DeliveryTag) -> Result<()> {
        self.take_awaiting(tag)?;
        self.session.pending_reject.insert(tag);
        Ok(())
    }

    fn take_awaiting(&mut self, tag: DeliveryTag) -> Result<()> {
        let mode = self.session.mode();
        if mode != AckMode::ActiveConfirmation {
            return Err(ConsumerError::NotActiveConfirmation(mode));
        }
        if !self.session.awaiting.remove(&tag) {
            return Err(ConsumerError::UnknownTag(tag));
        }
        Ok(())
    }

    /// Resolve the current batch after downstream completed without error.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AckBroker`] if an ack fails; unresolved tags
    /// stay tracked and a later call retries them.
    pub fn on_success(&mut self) -> Result<()> {
        match self.session.mode() {
            AckMode::AutoAck => Ok(()),
            AckMode::ActiveConfirmation => self.flush_active_confirmation(),
            AckMode::TransactionalBatch => self.ack_batch(),
        }
    }

    fn ack_batch(&mut self) -> Result<()> {
        let Some(last) = self.session.current_tag else {
            tracing::debug!("No unacknowledged deliveries in batch");
            return Ok(());
        };

        if self.session.bulk_ack_safe {
            tracing::info!(tag = %last, "Ack all messages");
            self.channel
                .basic_ack(last, true)
                .map_err(|source| ConsumerError::AckBroker { tag: last, source })?;
            self.session.acked += self.session.batch_tags.len() as u64;
            self.session.batch_tags.clear();
        } else {
            tracing::info!(
                tag = %last,
                batch = self.session.batch_tags.len(),
                "Ack batch one by one; earlier deliveries were abandoned"
            );
            while let Some(&tag) = self.session.batch_tags.front() {
                self.channel
                    .basic_ack(tag, false)
                    .map_err(|source| ConsumerError::AckBroker { tag, source })?;
                self.session.batch_tags.pop_front();
                self.session.acked += 1;
            }
        }

        self.session.current_tag = None;
        Ok(())
    }

    /// Abandon the current batch after a downstream error.
    ///
    /// Nothing is acked or nacked: the broker redelivers the abandoned
    /// deliveries once the channel closes.
    pub fn on_failure(&mut self) {
        if !self.session.mode().is_transactional() {
            return;
        }

        tracing::info!(
            tag = ?self.session.current_tag.map(DeliveryTag::value),
            "Ignoring messages"
        );
        if !self.session.batch_tags.is_empty() {
            self.session.bulk_ack_safe = false;
        }
        self.session.batch_tags.clear();
        self.session.current_tag = None;
    }

    /// Send every pending downstream decision to the broker, one tag at a time.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::AckBroker`] on the first failing call. Tags
    /// resolved before it are gone from the pending sets; the failing tag
    /// and everything after it remain for the next flush.
    pub fn flush_active_confirmation(&mut self) -> Result<()> {
        let mut acked = 0usize;
        while let Some(tag) = self.session.pending_ack.first().copied() {
            if let Err(source) = self.channel.basic_ack(tag, false) {
                tracing::warn!(
                    tag = %tag,
                    acked,
                    remaining = self.session.pending_ack.len(),
                    "Flush aborted on ack"
                );
                return Err(ConsumerError::AckBroker { tag, source });
            }
            self.session.pending_ack.remove(&tag);
            self.session.acked += 1;
            acked += 1;
        }
        if acked > 0 {
            tracing::info!(count = acked, "Acknowledged messages");
        }

        let mut rejected = 0usize;
        while let Some(tag) = self.session.pending_reject.first().copied() {
            if let Err(source) = self.channel.basic_nack(tag, false, false) {
                tracing::warn!(
                    tag = %tag,
                    rejected,
                    remaining = self.session.pending_reject.len(),
                    "Flush aborted on reject"
                );
                return Err(ConsumerError::AckBroker { tag, source });
            }
            self.session.pending_reject.remove(&tag);
            self.session.rejected += 1;
            rejected += 1;
        }
        if rejected > 0 {
            tracing::info!(count = rejected, "Rejected messages");
        }

        Ok(())
    }

    /// Flush pending confirmations, cancel the source and report the
    /// final counters. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns the flush error, if any, after the source has been cancelled
    /// and the summary logged.
    pub fn shutdown(&mut self) -> Result<SessionSummary> {
        let flushed = if self.session.has_pending_confirmations() {
            self.flush_active_confirmation()
        } else {
            Ok(())
        };

        self.source.cancel();
        if self.state != ProcessorState::Failed {
            self.state = ProcessorState::Stopped;
        }

        let summary = self.session.summary();
        tracing::info!(
            received = summary.count,
            ack = summary.acked,
            rejected = summary.rejected,
            requeue = summary.requeued,
            "Queue messages received"
        );

        flushed.map(|()| summary)
    }

    fn fail(&mut self, err: ConsumerError) -> ConsumerError {
        tracing::error!(
            error = %err,
            last_tag = ?self.session.current_tag.map(DeliveryTag::value),
            "Consumption failed; in-flight delivery left unresolved"
        );
        self.state = ProcessorState::Failed;
        err
    }
}
