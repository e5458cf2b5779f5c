//! Bounded, transactional message consumption for AMQP-style brokers.
//!
//! A [`DeliverySource`] turns the broker's push delivery into a blocking
//! pull with a timeout. A [`ConsumptionProcessor`] maps each delivery to an
//! output record and tracks whether it ends up acknowledged, rejected, or
//! left for the broker to requeue.

pub mod broker;
pub mod config;
pub mod errors;
pub mod mapping;
pub mod processor;
pub mod session;
pub mod sink;
pub mod source;

pub use broker::{BrokerChannel, MemoryBroker, QueueingConsumer};
pub use errors::ConsumerError;
pub use mapping::SlotMapping;
pub use processor::{ConsumptionProcessor, CycleOutcome, ProcessorOptions, ProcessorState};
pub use session::{ConsumptionSession, SessionSummary};
pub use sink::{CollectingSink, RowSink};
pub use source::{CancelHandle, DeliveryHandle, DeliverySource};
