//! Shared queuebyte model types.
//!
//! Deliveries, output records, acknowledgment modes and the broker error
//! model. This crate carries no broker or host dependencies so both the
//! engine and its drivers can share it.

pub mod delivery;
pub mod error;
pub mod mode;
pub mod record;

pub use delivery::{ConsumerTag, Delivery, DeliveryTag, HeaderValue, Headers};
pub use error::BrokerError;
pub use mode::AckMode;
pub use record::{OutputRecord, RecordError, SlotValue};
