//! Downstream row sink seam.

use queuebyte_types::OutputRecord;

/// Receives the records produced by a consumption session.
///
/// Assumed non-blocking, or backpressured by the host outside the engine.
pub trait RowSink {
    /// Hand one record downstream.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the session; the delivery stays unresolved.
    fn emit(&mut self, record: OutputRecord) -> anyhow::Result<()>;

    /// Bump the host's "lines input" counter.
    fn increment_input_count(&mut self);
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<OutputRecord>,
    pub input_count: u64,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowSink for CollectingSink {
    fn emit(&mut self, record: OutputRecord) -> anyhow::Result<()> {
        self.records.push(record);
        Ok(())
    }

    fn increment_input_count(&mut self) {
        self.input_count += 1;
    }
}
