//! Fixed-width output records produced from deliveries.

use serde::Serialize;

use crate::delivery::{DeliveryTag, HeaderValue};

/// A value stored in one record slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SlotValue {
    Text(String),
    Tag(DeliveryTag),
    Header(HeaderValue),
}

/// Errors from slot access on an [`OutputRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("slot {slot} out of range for record of width {width}")]
    SlotOutOfRange { slot: usize, width: usize },
}

/// Ordered, fixed-width slot structure handed to the row sink.
///
/// Serializes as a JSON array with `null` for empty slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutputRecord {
    slots: Vec<Option<SlotValue>>,
}

impl OutputRecord {
    /// Allocate a record with `width` empty slots.
    #[must_use]
    pub fn new(width: usize) -> Self {
        Self {
            slots: vec![None; width],
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Store `value` at `slot`, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::SlotOutOfRange`] if `slot >= width`.
    pub fn set(&mut self, slot: usize, value: SlotValue) -> Result<(), RecordError> {
        let width = self.slots.len();
        let entry = self
            .slots
            .get_mut(slot)
            .ok_or(RecordError::SlotOutOfRange { slot, width })?;
        *entry = Some(value);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&SlotValue> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn slots(&self) -> &[Option<SlotValue>] {
        &self.slots
    }

    /// Number of slots holding a value.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_empty() {
        let r = OutputRecord::new(3);
        assert_eq!(r.width(), 3);
        assert_eq!(r.filled(), 0);
        assert!(r.get(0).is_none());
    }

    #[test]
    fn set_out_of_range_errors() {
        let mut r = OutputRecord::new(2);
        let err = r.set(2, SlotValue::Text("x".into())).unwrap_err();
        assert_eq!(err, RecordError::SlotOutOfRange { slot: 2, width: 2 });
        assert_eq!(r.filled(), 0);
    }

    #[test]
    fn serializes_as_array_with_nulls() {
        let mut r = OutputRecord::new(3);
        r.set(0, SlotValue::Text("body".into())).unwrap();
        r.set(2, SlotValue::Tag(DeliveryTag::new(9))).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"["body",null,9]"#);
    }
}
