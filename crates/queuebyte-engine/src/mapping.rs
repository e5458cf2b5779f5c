//! Delivery-to-record slot mapping.
//!
//! Mapping is lenient: a mapped header that is missing or null leaves its
//! slot empty, and a slot outside the record width is dropped with a
//! warning. Neither stops the record from being emitted.

use std::collections::BTreeMap;

use queuebyte_types::{Delivery, OutputRecord, SlotValue};

use crate::config::RecordLayout;

/// Slot assignments, built once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMapping {
    width: usize,
    body_slot: usize,
    routing_slot: Option<usize>,
    tag_slot: Option<usize>,
    headers: BTreeMap<String, usize>,
}

impl SlotMapping {
    #[must_use]
    pub fn new(width: usize, body_slot: usize) -> Self {
        Self {
            width,
            body_slot,
            routing_slot: None,
            tag_slot: None,
            headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_layout(layout: &RecordLayout) -> Self {
        Self {
            width: layout.resolved_width(),
            body_slot: layout.body_slot,
            routing_slot: layout.routing_slot,
            tag_slot: layout.tag_slot,
            headers: layout.headers.clone(),
        }
    }

    #[must_use]
    pub fn with_routing_slot(mut self, slot: usize) -> Self {
        self.routing_slot = Some(slot);
        self
    }

    #[must_use]
    pub fn with_tag_slot(mut self, slot: usize) -> Self {
        self.tag_slot = Some(slot);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, slot: usize) -> Self {
        self.headers.insert(name.into(), slot);
        self
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Consume `delivery` into a record.
    #[must_use]
    pub fn map(&self, delivery: Delivery) -> OutputRecord {
        let mut record = OutputRecord::new(self.width);
        let tag = delivery.tag;

        let body = String::from_utf8(delivery.body)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        put(&mut record, "body", self.body_slot, SlotValue::Text(body));

        if let Some(slot) = self.routing_slot {
            put(&mut record, "routing_key", slot, SlotValue::Text(delivery.routing_key));
        }
        if let Some(slot) = self.tag_slot {
            put(&mut record, "delivery_tag", slot, SlotValue::Tag(tag));
        }

        if let Some(mut headers) = delivery.headers {
            for (name, slot) in &self.headers {
                if let Some(value) = headers.remove(name).flatten() {
                    put(&mut record, name, *slot, SlotValue::Header(value));
                }
            }
        }

        record
    }
}

fn put(record: &mut OutputRecord, field: &str, slot: usize, value: SlotValue) {
    if let Err(e) = record.set(slot, value) {
        tracing::warn!(field, error = %e, "Dropping value for unmappable slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuebyte_types::{DeliveryTag, HeaderValue};

    fn delivery() -> Delivery {
        Delivery::new(DeliveryTag::new(7), "orders.created", r#"{"id":1}"#)
    }

    #[test]
    fn maps_body_routing_and_tag() {
        let mapping = SlotMapping::new(3, 0).with_routing_slot(1).with_tag_slot(2);
        let record = mapping.map(delivery());
        assert_eq!(record.get(0), Some(&SlotValue::Text(r#"{"id":1}"#.into())));
        assert_eq!(record.get(1), Some(&SlotValue::Text("orders.created".into())));
        assert_eq!(record.get(2), Some(&SlotValue::Tag(DeliveryTag::new(7))));
    }

    #[test]
    fn unmapped_headers_are_dropped() {
        let mapping = SlotMapping::new(2, 0).with_header("trace", 1);
        let record = mapping.map(
            delivery()
                .with_header("trace", Some("abc".into()))
                .with_header("X", Some(HeaderValue::Int(1))),
        );
        assert_eq!(record.filled(), 2);
        assert_eq!(record.get(1), Some(&SlotValue::Header("abc".into())));
    }

    #[test]
    fn null_or_missing_mapped_header_leaves_slot_empty() {
        let mapping = SlotMapping::new(3, 0).with_header("nullable", 1).with_header("absent", 2);
        let record = mapping.map(delivery().with_header("nullable", None));
        assert_eq!(record.filled(), 1);
        assert!(record.get(1).is_none());
        assert!(record.get(2).is_none());
    }

    #[test]
    fn delivery_without_header_table_maps() {
        let mapping = SlotMapping::new(2, 0).with_header("trace", 1);
        let record = mapping.map(delivery());
        assert_eq!(record.filled(), 1);
    }

    #[test]
    fn out_of_range_slot_is_skipped() {
        let mapping = SlotMapping::new(1, 0).with_tag_slot(5);
        let record = mapping.map(delivery());
        assert_eq!(record.width(), 1);
        assert_eq!(record.filled(), 1);
    }

    #[test]
    fn invalid_utf8_body_is_replaced() {
        let mapping = SlotMapping::new(1, 0);
        let record = mapping.map(Delivery::new(DeliveryTag::new(1), "rk", vec![0xfe, b'a']));
        assert_eq!(record.get(0), Some(&SlotValue::Text("\u{fffd}a".into())));
    }

    #[test]
    fn empty_body_maps_to_empty_text() {
        let mapping = SlotMapping::new(1, 0);
        let record = mapping.map(Delivery::new(DeliveryTag::new(1), "rk", Vec::new()));
        assert_eq!(record.get(0), Some(&SlotValue::Text(String::new())));
    }

    #[test]
    fn from_layout_uses_resolved_width() {
        let layout = RecordLayout {
            headers: [("x-id".to_string(), 3)].into_iter().collect(),
            ..RecordLayout::default()
        };
        assert_eq!(SlotMapping::from_layout(&layout).width(), 4);
    }
}
