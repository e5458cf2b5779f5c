//! Consumer configuration: YAML model, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use types::{ConsumerConfig, RecordLayout, MAX_RECORD_WIDTH};
