//! Per-run consumption state and its final summary.

use std::collections::{BTreeSet, VecDeque};

use queuebyte_types::{AckMode, DeliveryTag};
use serde::Serialize;

/// Mutable state of one consumption session.
///
/// Owned by the [`ConsumptionProcessor`](crate::processor::ConsumptionProcessor);
/// read-only outside it. Counters only grow, and
/// `acked + rejected <= count` holds after every operation.
#[derive(Debug, Clone)]
pub struct ConsumptionSession {
    mode: AckMode,
    limit: Option<u64>,
    count: u64,
    pub(crate) acked: u64,
    pub(crate) rejected: u64,
    pub(crate) current_tag: Option<DeliveryTag>,
    /// Transactional-batch tags delivered since the last resolution.
    pub(crate) batch_tags: VecDeque<DeliveryTag>,
    /// Active-confirmation tags emitted but not yet confirmed downstream.
    pub(crate) awaiting: BTreeSet<DeliveryTag>,
    pub(crate) pending_ack: BTreeSet<DeliveryTag>,
    pub(crate) pending_reject: BTreeSet<DeliveryTag>,
    /// Cleared once any delivery below the current position was abandoned;
    /// a multiple-ack would then resolve it by accident.
    pub(crate) bulk_ack_safe: bool,
}

impl ConsumptionSession {
    /// `limit` of 0 or `None` means unbounded.
    #[must_use]
    pub fn new(mode: AckMode, limit: Option<u64>) -> Self {
        Self {
            mode,
            limit: limit.filter(|l| *l > 0),
            count: 0,
            acked: 0,
            rejected: 0,
            current_tag: None,
            batch_tags: VecDeque::new(),
            awaiting: BTreeSet::new(),
            pending_ack: BTreeSet::new(),
            pending_reject: BTreeSet::new(),
            bulk_ack_safe: true,
        }
    }

    #[must_use]
    pub fn mode(&self) -> AckMode {
        self.mode
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn acked(&self) -> u64 {
        self.acked
    }

    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Deliveries neither acked nor rejected; the broker requeues them
    /// when the channel closes.
    #[must_use]
    pub fn requeued(&self) -> u64 {
        self.count - self.acked - self.rejected
    }

    #[must_use]
    pub fn current_tag(&self) -> Option<DeliveryTag> {
        self.current_tag
    }

    #[must_use]
    pub fn pending_ack(&self) -> &BTreeSet<DeliveryTag> {
        &self.pending_ack
    }

    #[must_use]
    pub fn pending_reject(&self) -> &BTreeSet<DeliveryTag> {
        &self.pending_reject
    }

    #[must_use]
    pub fn awaiting_confirmation(&self) -> &BTreeSet<DeliveryTag> {
        &self.awaiting
    }

    #[must_use]
    pub fn has_pending_confirmations(&self) -> bool {
        !self.pending_ack.is_empty() || !self.pending_reject.is_empty()
    }

    #[must_use]
    pub fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.count >= limit)
    }

    pub(crate) fn record_emitted(&mut self, tag: DeliveryTag) {
        self.count += 1;
        self.current_tag = Some(tag);
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            count: self.count,
            acked: self.acked,
            rejected: self.rejected,
            requeued: self.requeued(),
        }
    }
}

/// Final classification of every delivery a session consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub count: u64,
    pub acked: u64,
    pub rejected: u64,
    pub requeued: u64,
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={}, ack={}, rejected={}, requeue={}",
            self.count, self.acked, self.rejected, self.requeued
        )
    }
}
