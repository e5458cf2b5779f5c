//! Broker deliveries and their identifiers.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Broker-assigned delivery tag.
///
/// Unique and strictly increasing per channel, which is what makes
/// "acknowledge up to and including" bulk acks well defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    #[must_use]
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DeliveryTag {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Opaque identifier of a broker subscription, returned by `basic_consume`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of a single AMQP message header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<HeaderValue>),
}

impl std::fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Message headers. A header can be present with a null value.
pub type Headers = BTreeMap<String, Option<HeaderValue>>;

/// A single message handed over by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub tag: DeliveryTag,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default)]
    pub redelivered: bool,
    /// Opaque payload bytes.
    #[serde(default)]
    pub body: Vec<u8>,
    /// `None` when the message carried no header table at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
}

impl Delivery {
    #[must_use]
    pub fn new(tag: DeliveryTag, routing_key: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            exchange: String::new(),
            routing_key: routing_key.into(),
            redelivered: false,
            body: body.into(),
            headers: None,
        }
    }

    /// Attach a header, creating the header table on first use.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: Option<HeaderValue>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value);
        self
    }

    /// Body decoded as UTF-8; invalid sequences become U+FFFD.
    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Look up a header value. `None` covers both a missing header and a
    /// header present with a null value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .and_then(Option::as_ref)
    }
}
