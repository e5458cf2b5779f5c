//! Consumer error model.

use queuebyte_types::{AckMode, BrokerError, ConsumerTag, DeliveryTag};

/// Errors surfaced by the delivery source and the consumption processor.
///
/// An empty poll is not an error: it is reported as `Ok(None)` by
/// [`DeliveryHandle::next_delivery`](crate::source::DeliveryHandle::next_delivery).
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The broker refused to register the subscription.
    #[error("failed to subscribe to queue '{queue}': {source}")]
    Subscription {
        queue: String,
        #[source]
        source: BrokerError,
    },

    /// The broker cancelled the subscription server-side.
    #[error("consumer {consumer_tag} was cancelled by the broker")]
    ConsumerCancelled { consumer_tag: ConsumerTag },

    /// The channel or connection was torn down while consuming.
    #[error("channel shut down: {reason}")]
    ChannelShutdown { reason: String },

    /// A delivery was requested before `start()`.
    #[error("consumer is not subscribed; call start() first")]
    NotSubscribed,

    /// A broker ack/nack call failed. Unresolved tags stay pending.
    #[error("broker failed to resolve delivery {tag}: {source}")]
    AckBroker {
        tag: DeliveryTag,
        #[source]
        source: BrokerError,
    },

    /// The downstream row sink rejected a record.
    #[error("row sink failed: {0}")]
    Sink(#[source] anyhow::Error),

    /// Explicit confirmations were issued outside active-confirmation mode.
    #[error("explicit confirmations require active_confirmation mode (session mode is {0})")]
    NotActiveConfirmation(AckMode),

    /// The tag was never emitted by this session or was already confirmed.
    #[error("delivery {0} is not awaiting confirmation")]
    UnknownTag(DeliveryTag),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ConsumerError>;

impl ConsumerError {
    /// Fatal errors end the session; the host decides whether to restart it.
    ///
    /// `AckBroker` is classified as retryable because a failed flush keeps
    /// its tags pending for the next flush or `shutdown()`. A failed
    /// auto-ack inside `process_one` still ends the session: the processor
    /// moves to `Failed` and its state is the authority for the host loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Subscription { .. }
            | Self::ConsumerCancelled { .. }
            | Self::ChannelShutdown { .. }
            | Self::NotSubscribed
            | Self::Sink(_) => true,
            Self::AckBroker { .. } | Self::NotActiveConfirmation(_) | Self::UnknownTag(_) => false,
        }
    }
}
