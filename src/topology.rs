//! Descriptors of the exchange, queue, binding and subscription a connection works with.
//!
//! ```
//! use amqp_pool::topology::{ExchangeConfig, ExchangeKind, QueueConfig, TopologyConfig};
//!
//! let topology = TopologyConfig {
//!     exchange: ExchangeConfig::new("orders", ExchangeKind::Topic),
//!     queue: QueueConfig::new("orders.created"),
//!     ..TopologyConfig::default()
//! };
//! # drop(topology);
//! ```
use amq_protocol_types::FieldTable;
use serde::Deserialize;

fn default_durable() -> bool {
    true
}

/// The routing algorithm of an exchange.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Topic,
    Fanout,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => Self::Direct,
            ExchangeKind::Topic => Self::Topic,
            ExchangeKind::Fanout => Self::Fanout,
            ExchangeKind::Headers => Self::Headers,
        }
    }
}

/// How to declare an exchange.
///
/// When deserialized, `name` and `kind` have no default: a descriptor missing either of them
/// is rejected when the connection tries to declare it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: Option<ExchangeKind>,
    #[serde(default)]
    pub passive: bool,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub nowait: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    /// Access ticket. Obsolete since AMQP 0-9-1, brokers ignore it.
    #[serde(default)]
    pub ticket: Option<u16>,
}

impl ExchangeConfig {
    /// A durable exchange with the given name and kind.
    pub fn new(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind),
            passive: false,
            durable: true,
            auto_delete: false,
            internal: false,
            nowait: false,
            arguments: FieldTable::default(),
            ticket: None,
        }
    }

    /// Returns the exchange kind, or why the descriptor cannot be declared.
    pub(crate) fn validate(&self) -> Result<ExchangeKind, String> {
        match self.kind {
            Some(kind) if !self.name.is_empty() => Ok(kind),
            _ => Err("exchange error, must contain name and type".into()),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::new("exchange", ExchangeKind::Direct)
    }
}

/// How to declare a queue.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueueConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub passive: bool,
    #[serde(default = "default_durable")]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub nowait: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    #[serde(default)]
    pub ticket: Option<u16>,
}

impl QueueConfig {
    /// A durable, non-exclusive queue with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
            nowait: false,
            arguments: FieldTable::default(),
            ticket: None,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("queue error, must contain name".into());
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new("queue")
    }
}

/// How the queue is bound to the exchange.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct RouteConfig {
    /// Binding key. Empty matches everything on a fanout exchange.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub nowait: bool,
    #[serde(default)]
    pub arguments: FieldTable,
    #[serde(default)]
    pub ticket: Option<u16>,
}

impl RouteConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }
}

/// Message bodies that stop a consume loop.
///
/// Deserializes from either a single string or a list of strings.
/// Matching is an exact comparison against the raw message body.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum CancelSentinels {
    Single(String),
    Set(Vec<String>),
}

impl CancelSentinels {
    pub fn matches(&self, body: &[u8]) -> bool {
        match self {
            Self::Single(sentinel) => sentinel.as_bytes() == body,
            Self::Set(sentinels) => sentinels.iter().any(|s| s.as_bytes() == body),
        }
    }
}

impl Default for CancelSentinels {
    fn default() -> Self {
        Self::Set(Vec::new())
    }
}

impl<const N: usize> From<[&str; N]> for CancelSentinels {
    fn from(sentinels: [&str; N]) -> Self {
        Self::Set(sentinels.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&str> for CancelSentinels {
    fn from(sentinel: &str) -> Self {
        Self::Single(sentinel.into())
    }
}

/// How to subscribe to the queue in [`BrokerConnection::consume`](crate::connection::BrokerConnection::consume).
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsumeConfig {
    /// Bodies that end the subscription once received.
    pub cancel_tag: CancelSentinels,
    /// Empty lets the broker generate a tag.
    pub consumer_tag: String,
    pub no_local: bool,
    /// Deliveries are considered acknowledged by the broker as soon as they are sent.
    pub no_ack: bool,
    pub exclusive: bool,
    pub nowait: bool,
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            cancel_tag: ["exit", "quit"].into(),
            consumer_tag: "consumer".into(),
            no_local: false,
            no_ack: false,
            exclusive: false,
            nowait: false,
        }
    }
}

/// The full set of descriptors a connection is configured with.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct TopologyConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub route: RouteConfig,
    #[serde(default)]
    pub consume: ConsumeConfig,
}
