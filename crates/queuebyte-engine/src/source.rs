//! Pull-style delivery source over a [`QueueingConsumer`].
//!
//! [`DeliverySource`] owns the subscription for one session. Its
//! [`CancelHandle`] is the only piece that may be used from another
//! thread; cancelling through it wakes a blocked [`DeliverySource::next_delivery`].

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use queuebyte_types::{ConsumerTag, Delivery};

use crate::broker::{BrokerChannel, ConsumerEvent, QueueingConsumer};
use crate::errors::{ConsumerError, Result};

/// Pull interface the processor consumes deliveries through.
pub trait DeliveryHandle {
    /// Register the subscription. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscription`] if the broker refuses.
    fn start(&mut self) -> Result<()>;

    /// Wait up to `timeout` for the next delivery. `Ok(None)` on timeout
    /// or once the source has been cancelled locally.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::ConsumerCancelled`] or
    /// [`ConsumerError::ChannelShutdown`] when the broker ends the
    /// subscription; both are fatal to the session.
    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>>;

    /// Best-effort unregistration; never fails.
    fn cancel(&mut self);

    /// Whether the subscription was cancelled from our side.
    fn is_cancelled(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Subscription {
    Idle,
    Active(ConsumerTag),
    Cancelled,
}

fn lock(subscription: &Mutex<Subscription>) -> MutexGuard<'_, Subscription> {
    subscription.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable, thread-safe cancellation trigger for a [`DeliverySource`].
#[derive(Clone)]
pub struct CancelHandle {
    channel: Arc<dyn BrokerChannel>,
    subscription: Arc<Mutex<Subscription>>,
    waker: QueueingConsumer,
}

impl CancelHandle {
    /// Unregister the subscription and wake any waiting `next_delivery`.
    ///
    /// Safe to call repeatedly and after the channel has closed.
    pub fn cancel(&self) {
        let previous = std::mem::replace(&mut *lock(&self.subscription), Subscription::Cancelled);
        match previous {
            Subscription::Cancelled => return,
            Subscription::Idle => {}
            Subscription::Active(tag) => {
                tracing::info!(consumer_tag = tag.as_str(), "Cancelling subscription");
                if let Err(e) = self.channel.basic_cancel(&tag) {
                    tracing::warn!(
                        consumer_tag = tag.as_str(),
                        error = %e,
                        "basic_cancel failed; treating subscription as cancelled"
                    );
                }
            }
        }
        self.waker.wake();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *lock(&self.subscription) == Subscription::Cancelled
    }
}

/// Bridges the broker's push delivery into a bounded, blocking pull.
pub struct DeliverySource {
    queue: String,
    consumer: QueueingConsumer,
    events: Receiver<ConsumerEvent>,
    handle: CancelHandle,
}

impl DeliverySource {
    #[must_use]
    pub fn new(channel: Arc<dyn BrokerChannel>, queue: impl Into<String>) -> Self {
        let (consumer, events) = QueueingConsumer::channel();
        let handle = CancelHandle {
            channel,
            subscription: Arc::new(Mutex::new(Subscription::Idle)),
            waker: consumer.clone(),
        };
        Self {
            queue: queue.into(),
            consumer,
            events,
            handle,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Tag of the active subscription, if any.
    #[must_use]
    pub fn consumer_tag(&self) -> Option<ConsumerTag> {
        match &*lock(&self.handle.subscription) {
            Subscription::Active(tag) => Some(tag.clone()),
            Subscription::Idle | Subscription::Cancelled => None,
        }
    }

    /// Handle for cancelling this source from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }
}

impl DeliveryHandle for DeliverySource {
    fn start(&mut self) -> Result<()> {
        let mut subscription = lock(&self.handle.subscription);
        if *subscription != Subscription::Idle {
            return Ok(());
        }
        let tag = self
            .handle
            .channel
            .basic_consume(&self.queue, false, self.consumer.clone())
            .map_err(|source| ConsumerError::Subscription {
                queue: self.queue.clone(),
                source,
            })?;
        tracing::info!(
            queue = self.queue.as_str(),
            consumer_tag = tag.as_str(),
            "Waiting for messages"
        );
        *subscription = Subscription::Active(tag);
        Ok(())
    }

    fn next_delivery(&mut self, timeout: Duration) -> Result<Option<Delivery>> {
        match &*lock(&self.handle.subscription) {
            Subscription::Cancelled => return Ok(None),
            Subscription::Idle => return Err(ConsumerError::NotSubscribed),
            Subscription::Active(_) => {}
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = match self.events.recv_timeout(remaining) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ConsumerError::ChannelShutdown {
                        reason: "consumer queue disconnected".to_string(),
                    })
                }
            };

            if self.is_cancelled() {
                // Anything still buffered stays unacked and is redelivered.
                return Ok(None);
            }

            match event {
                ConsumerEvent::Delivery(delivery) => return Ok(Some(delivery)),
                ConsumerEvent::Cancelled { consumer_tag } => {
                    *lock(&self.handle.subscription) = Subscription::Cancelled;
                    return Err(ConsumerError::ConsumerCancelled { consumer_tag });
                }
                ConsumerEvent::Shutdown { reason } => {
                    *lock(&self.handle.subscription) = Subscription::Cancelled;
                    return Err(ConsumerError::ChannelShutdown { reason });
                }
                // Stale wake-up from a cancel that raced with a restart.
                ConsumerEvent::Wake => {}
            }
        }
    }

    fn cancel(&mut self) {
        self.handle.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerCall, MemoryBroker};
    use queuebyte_types::DeliveryTag;

    const WAIT: Duration = Duration::from_millis(20);

    fn source_on(queue: &str) -> (Arc<MemoryBroker>, DeliverySource) {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_queue(queue);
        let source = DeliverySource::new(broker.clone(), queue);
        (broker, source)
    }

    #[test]
    fn start_is_idempotent() {
        let (broker, mut source) = source_on("q");
        source.start().unwrap();
        let first = source.consumer_tag();
        source.start().unwrap();
        assert_eq!(source.consumer_tag(), first);
        assert_eq!(broker.subscriber_count(), 1);
    }

    #[test]
    fn start_on_unknown_queue_fails() {
        let broker = Arc::new(MemoryBroker::new());
        let mut source = DeliverySource::new(broker, "nope");
        let err = source.start().unwrap_err();
        assert!(matches!(err, ConsumerError::Subscription { ref queue, .. } if queue == "nope"));
    }

    #[test]
    fn next_delivery_before_start_errors() {
        let (_broker, mut source) = source_on("q");
        assert!(matches!(
            source.next_delivery(WAIT),
            Err(ConsumerError::NotSubscribed)
        ));
    }

    #[test]
    fn timeout_returns_none() {
        let (_broker, mut source) = source_on("q");
        source.start().unwrap();
        assert!(source.next_delivery(WAIT).unwrap().is_none());
        assert!(!source.is_cancelled());
    }

    #[test]
    fn delivers_in_publish_order() {
        let (broker, mut source) = source_on("q");
        source.start().unwrap();
        broker.publish("q", "a", "one").unwrap();
        broker.publish("q", "b", "two").unwrap();
        let first = source.next_delivery(WAIT).unwrap().unwrap();
        let second = source.next_delivery(WAIT).unwrap().unwrap();
        assert_eq!((first.tag, first.routing_key.as_str()), (DeliveryTag::new(1), "a"));
        assert_eq!(second.tag, DeliveryTag::new(2));
        assert_eq!(second.body_text(), "two");
    }

    #[test]
    fn server_cancel_is_fatal() {
        let (broker, mut source) = source_on("q");
        source.start().unwrap();
        broker.cancel_from_server("q");
        let err = source.next_delivery(WAIT).unwrap_err();
        assert!(matches!(err, ConsumerError::ConsumerCancelled { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn channel_shutdown_is_fatal() {
        let (broker, mut source) = source_on("q");
        source.start().unwrap();
        broker.shutdown("connection reset by peer");
        let err = source.next_delivery(WAIT).unwrap_err();
        assert!(
            matches!(err, ConsumerError::ChannelShutdown { ref reason } if reason.contains("reset"))
        );
    }

    #[test]
    fn cancel_is_idempotent_and_safe_after_close() {
        let (broker, mut source) = source_on("q");
        source.start().unwrap();
        broker.shutdown("gone");
        source.cancel();
        source.cancel();
        assert!(source.is_cancelled());
        assert!(source.next_delivery(WAIT).unwrap().is_none());
    }

    #[test]
    fn cancel_before_start_is_noop() {
        let (broker, mut source) = source_on("q");
        source.cancel();
        assert!(source.is_cancelled());
        assert!(broker.calls().is_empty());
    }

    #[test]
    fn cancel_unregisters_once() {
        let (broker, mut source) = source_on("q");
        source.start().unwrap();
        source.cancel();
        source.cancel();
        let cancels = broker
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BrokerCall::Cancel { .. }))
            .count();
        assert_eq!(cancels, 1);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn cancel_from_other_thread_unblocks_wait() {
        let (_broker, mut source) = source_on("q");
        source.start().unwrap();
        let handle = source.cancel_handle();

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.cancel();
        });

        let started = Instant::now();
        let result = source.next_delivery(Duration::from_secs(30)).unwrap();
        canceller.join().unwrap();

        assert!(result.is_none());
        assert!(source.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
