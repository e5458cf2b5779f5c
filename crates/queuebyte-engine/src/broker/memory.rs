//! In-process [`BrokerChannel`] implementation.
//!
//! Models a single channel: delivery tags are assigned per channel and
//! strictly increase, outstanding deliveries are tracked until acked or
//! nacked, and a shutdown returns every outstanding delivery to its queue
//! flagged as redelivered. Every call is recorded for inspection.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use queuebyte_types::{BrokerError, ConsumerTag, Delivery, DeliveryTag, Headers};

use super::{BrokerChannel, QueueingConsumer};

/// A broker call as observed by [`MemoryBroker`], successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Consume {
        queue: String,
        consumer_tag: ConsumerTag,
    },
    Cancel {
        consumer_tag: ConsumerTag,
    },
    Ack {
        tag: DeliveryTag,
        multiple: bool,
    },
    Nack {
        tag: DeliveryTag,
        multiple: bool,
        requeue: bool,
    },
}

#[derive(Debug, Clone)]
struct Message {
    routing_key: String,
    body: Vec<u8>,
    headers: Option<Headers>,
    redelivered: bool,
}

struct Subscriber {
    tag: ConsumerTag,
    queue: String,
    consumer: QueueingConsumer,
}

struct Outstanding {
    queue: String,
    message: Message,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Message>>,
    subscribers: Vec<Subscriber>,
    outstanding: BTreeMap<DeliveryTag, Outstanding>,
    acked: Vec<DeliveryTag>,
    rejected: Vec<DeliveryTag>,
    calls: Vec<BrokerCall>,
    failing_acks: HashSet<DeliveryTag>,
    failing_nacks: HashSet<DeliveryTag>,
    next_tag: u64,
    next_consumer: u64,
    closed: bool,
}

impl BrokerState {
    /// Push queued messages to the first subscriber of each queue.
    fn dispatch(&mut self) {
        for subscriber in &self.subscribers {
            let Some(queue) = self.queues.get_mut(&subscriber.queue) else {
                continue;
            };
            while let Some(message) = queue.pop_front() {
                self.next_tag += 1;
                let tag = DeliveryTag::new(self.next_tag);
                let delivery = Delivery {
                    tag,
                    exchange: String::new(),
                    routing_key: message.routing_key.clone(),
                    redelivered: message.redelivered,
                    body: message.body.clone(),
                    headers: message.headers.clone(),
                };
                if !subscriber.consumer.handle_delivery(delivery) {
                    queue.push_front(message);
                    break;
                }
                self.outstanding.insert(
                    tag,
                    Outstanding {
                        queue: subscriber.queue.clone(),
                        message,
                    },
                );
            }
        }
    }

    /// Resolve `tag` (and everything below it with `multiple`).
    fn take_outstanding(
        &mut self,
        tag: DeliveryTag,
        multiple: bool,
    ) -> Result<Vec<(DeliveryTag, Outstanding)>, BrokerError> {
        if !self.outstanding.contains_key(&tag) {
            return Err(BrokerError::Rejected(format!(
                "PRECONDITION_FAILED - unknown delivery tag {tag}"
            )));
        }
        if !multiple {
            return Ok(self
                .outstanding
                .remove(&tag)
                .map(|o| vec![(tag, o)])
                .unwrap_or_default());
        }
        let keys: Vec<DeliveryTag> = self.outstanding.range(..=tag).map(|(k, _)| *k).collect();
        Ok(keys
            .into_iter()
            .filter_map(|k| self.outstanding.remove(&k).map(|o| (k, o)))
            .collect())
    }

    fn requeue(&mut self, resolved: Vec<(DeliveryTag, Outstanding)>) {
        for (_, outstanding) in resolved.into_iter().rev() {
            let mut message = outstanding.message;
            message.redelivered = true;
            self.queues
                .entry(outstanding.queue)
                .or_default()
                .push_front(message);
        }
    }
}

/// Thread-safe in-memory broker channel.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `queue` if it does not exist.
    pub fn declare_queue(&self, queue: &str) {
        self.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Publish a message without headers.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Rejected`] for an undeclared queue and
    /// [`BrokerError::Closed`] after shutdown.
    pub fn publish(
        &self,
        queue: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<(), BrokerError> {
        self.publish_with_headers(queue, routing_key, body, None)
    }

    /// Publish a message carrying an optional header table.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryBroker::publish`].
    pub fn publish_with_headers(
        &self,
        queue: &str,
        routing_key: &str,
        body: impl Into<Vec<u8>>,
        headers: Option<Headers>,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let messages = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::Rejected(format!("NOT_FOUND - no queue '{queue}'")))?;
        messages.push_back(Message {
            routing_key: routing_key.to_string(),
            body: body.into(),
            headers,
            redelivered: false,
        });
        state.dispatch();
        Ok(())
    }

    /// Make the next ack of `tag` fail with an i/o error.
    pub fn fail_next_ack(&self, tag: DeliveryTag) {
        self.lock().failing_acks.insert(tag);
    }

    /// Make the next nack of `tag` fail with an i/o error.
    pub fn fail_next_nack(&self, tag: DeliveryTag) {
        self.lock().failing_nacks.insert(tag);
    }

    /// Cancel every subscription on `queue` from the broker side.
    pub fn cancel_from_server(&self, queue: &str) {
        let mut state = self.lock();
        let (cancelled, kept): (Vec<_>, Vec<_>) = state
            .subscribers
            .drain(..)
            .partition(|s| s.queue == queue);
        state.subscribers = kept;
        drop(state);
        for subscriber in cancelled {
            subscriber.consumer.handle_cancel(&subscriber.tag);
        }
    }

    /// Close the channel. Outstanding deliveries return to their queues
    /// and every subscriber receives a shutdown signal.
    pub fn shutdown(&self, reason: &str) {
        let mut state = self.lock();
        state.closed = true;
        let outstanding = std::mem::take(&mut state.outstanding);
        state.requeue(outstanding.into_iter().collect());
        let subscribers = std::mem::take(&mut state.subscribers);
        drop(state);
        for subscriber in subscribers {
            subscriber.consumer.handle_shutdown(&subscriber.tag, reason);
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    /// Tags resolved by successful acks, in resolution order.
    #[must_use]
    pub fn acked_tags(&self) -> Vec<DeliveryTag> {
        self.lock().acked.clone()
    }

    /// Tags resolved by successful nacks, in resolution order.
    #[must_use]
    pub fn rejected_tags(&self) -> Vec<DeliveryTag> {
        self.lock().rejected.clone()
    }

    /// Delivered tags that are neither acked nor nacked.
    #[must_use]
    pub fn outstanding_tags(&self) -> Vec<DeliveryTag> {
        self.lock().outstanding.keys().copied().collect()
    }

    /// Messages waiting in `queue` that have not been delivered.
    #[must_use]
    pub fn queued(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl BrokerChannel for MemoryBroker {
    fn basic_consume(
        &self,
        queue: &str,
        _auto_ack: bool,
        consumer: QueueingConsumer,
    ) -> Result<ConsumerTag, BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::Rejected(format!("NOT_FOUND - no queue '{queue}'")));
        }
        state.next_consumer += 1;
        let tag = ConsumerTag::new(format!("ctag-{}", state.next_consumer));
        state.calls.push(BrokerCall::Consume {
            queue: queue.to_string(),
            consumer_tag: tag.clone(),
        });
        state.subscribers.push(Subscriber {
            tag: tag.clone(),
            queue: queue.to_string(),
            consumer,
        });
        state.dispatch();
        Ok(tag)
    }

    fn basic_cancel(&self, consumer_tag: &ConsumerTag) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.calls.push(BrokerCall::Cancel {
            consumer_tag: consumer_tag.clone(),
        });
        let before = state.subscribers.len();
        state.subscribers.retain(|s| &s.tag != consumer_tag);
        if state.subscribers.len() == before {
            return Err(BrokerError::Rejected(format!(
                "NOT_FOUND - unknown consumer tag '{consumer_tag}'"
            )));
        }
        Ok(())
    }

    fn basic_ack(&self, tag: DeliveryTag, multiple: bool) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.calls.push(BrokerCall::Ack { tag, multiple });
        if state.failing_acks.remove(&tag) {
            return Err(BrokerError::Io(format!("injected ack failure for tag {tag}")));
        }
        let resolved = state.take_outstanding(tag, multiple)?;
        state.acked.extend(resolved.into_iter().map(|(t, _)| t));
        Ok(())
    }

    fn basic_nack(
        &self,
        tag: DeliveryTag,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.calls.push(BrokerCall::Nack {
            tag,
            multiple,
            requeue,
        });
        if state.failing_nacks.remove(&tag) {
            return Err(BrokerError::Io(format!("injected nack failure for tag {tag}")));
        }
        let resolved = state.take_outstanding(tag, multiple)?;
        if requeue {
            state.requeue(resolved);
            state.dispatch();
        } else {
            state.rejected.extend(resolved.into_iter().map(|(t, _)| t));
        }
        Ok(())
    }
}
