//! Broker channel seam and the queueing consumer handed to it.
//!
//! The broker pushes deliveries into a [`QueueingConsumer`]; the
//! [`DeliverySource`](crate::source::DeliverySource) pulls them back out.

pub mod memory;

use std::sync::mpsc;

use queuebyte_types::{BrokerError, ConsumerTag, Delivery, DeliveryTag};

pub use memory::{BrokerCall, MemoryBroker};

/// The subset of an AMQP channel the engine needs.
///
/// Implementations must be `Send + Sync`: the channel is shared by the
/// processing thread and the cancel path behind `Arc<dyn BrokerChannel>`.
pub trait BrokerChannel: Send + Sync {
    /// Register `consumer` against `queue`, returning the subscription tag.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the broker refuses the subscription.
    fn basic_consume(
        &self,
        queue: &str,
        auto_ack: bool,
        consumer: QueueingConsumer,
    ) -> Result<ConsumerTag, BrokerError>;

    /// Unregister a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if the tag is unknown or the channel is closed.
    fn basic_cancel(&self, consumer_tag: &ConsumerTag) -> Result<(), BrokerError>;

    /// Acknowledge `tag`, or every outstanding tag up to and including it
    /// when `multiple` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] on an unknown tag or a closed channel.
    fn basic_ack(&self, tag: DeliveryTag, multiple: bool) -> Result<(), BrokerError>;

    /// Negatively acknowledge `tag` (or a range with `multiple`).
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] on an unknown tag or a closed channel.
    fn basic_nack(&self, tag: DeliveryTag, multiple: bool, requeue: bool)
        -> Result<(), BrokerError>;
}

/// Events queued by the broker for a single subscription.
#[derive(Debug)]
pub enum ConsumerEvent {
    Delivery(Delivery),
    /// Server-side cancellation.
    Cancelled { consumer_tag: ConsumerTag },
    /// Channel or connection shutdown signal.
    Shutdown { reason: String },
    /// Local wake-up posted when the subscription is cancelled by us.
    Wake,
}

/// Callback object registered with the broker.
///
/// Every callback only enqueues an event, so it never blocks the broker's
/// dispatch thread.
#[derive(Debug, Clone)]
pub struct QueueingConsumer {
    sender: mpsc::Sender<ConsumerEvent>,
}

impl QueueingConsumer {
    /// Create a consumer together with the receiving end of its queue.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<ConsumerEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }

    /// Enqueue a delivery. Returns `false` if nobody is listening anymore.
    pub fn handle_delivery(&self, delivery: Delivery) -> bool {
        self.sender.send(ConsumerEvent::Delivery(delivery)).is_ok()
    }

    pub fn handle_cancel(&self, consumer_tag: &ConsumerTag) {
        tracing::info!(consumer_tag = consumer_tag.as_str(), "Consumer cancelled by broker");
        let _ = self.sender.send(ConsumerEvent::Cancelled {
            consumer_tag: consumer_tag.clone(),
        });
    }

    pub fn handle_shutdown(&self, consumer_tag: &ConsumerTag, reason: &str) {
        tracing::debug!(
            consumer_tag = consumer_tag.as_str(),
            reason,
            "Consumer received shutdown signal"
        );
        let _ = self.sender.send(ConsumerEvent::Shutdown {
            reason: reason.to_string(),
        });
    }

    pub(crate) fn wake(&self) {
        let _ = self.sender.send(ConsumerEvent::Wake);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn BrokerChannel) {}
    }

    #[test]
    fn consumer_enqueues_in_order() {
        let (consumer, rx) = QueueingConsumer::channel();
        assert!(consumer.handle_delivery(Delivery::new(DeliveryTag::new(1), "a", "x")));
        consumer.handle_shutdown(&ConsumerTag::new("ctag-1"), "connection reset");

        match rx.recv().unwrap() {
            ConsumerEvent::Delivery(d) => assert_eq!(d.tag, DeliveryTag::new(1)),
            other => panic!("expected delivery, got {other:?}"),
        }
        match rx.recv().unwrap() {
            ConsumerEvent::Shutdown { reason } => assert_eq!(reason, "connection reset"),
            other => panic!("expected shutdown, got {other:?}"),
        }
    }

    #[test]
    fn delivery_to_dropped_receiver_reports_false() {
        let (consumer, rx) = QueueingConsumer::channel();
        drop(rx);
        assert!(!consumer.handle_delivery(Delivery::new(DeliveryTag::new(1), "a", "x")));
    }
}
