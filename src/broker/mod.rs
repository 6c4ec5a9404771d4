//! Message broker abstraction feeding a stream-backed manager.
//!
//! Provides a trait-based broker so the consume loop can run against a real
//! NATS connection (feature `nats`) or the in-process [`MemoryBroker`].

mod memory;
#[cfg(feature = "nats")]
mod nats;

pub use memory::MemoryBroker;
#[cfg(feature = "nats")]
pub use nats::NatsBroker;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Acknowledges one delivery back to the broker
#[async_trait]
pub trait Acker: Send + Sync {
    /// Acknowledge the delivery
    async fn ack(&self) -> Result<()>;
}

/// One message received from the broker
pub struct Delivery {
    /// Routing key the message was published with; `None` fans out to every tracker
    pub routing_key: Option<String>,
    /// Raw message body
    pub payload: Vec<u8>,
    acker: Option<Box<dyn Acker>>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Delivery {
    /// A delivery that needs no acknowledgement
    pub fn new(routing_key: Option<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            routing_key,
            payload: payload.into(),
            acker: None,
        }
    }

    /// Attach an acknowledgement handle
    pub fn with_acker(mut self, acker: Box<dyn Acker>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Acknowledge this delivery, consuming it
    pub async fn ack(self) -> Result<()> {
        match self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

/// Source of deliveries for the consume loop
#[async_trait]
pub trait Broker: Send + Sync {
    /// Wait for the next delivery; `Ok(None)` means the broker closed for good
    async fn recv(&self) -> Result<Option<Delivery>>;
}

/// The `keywords` field: a JSON-encoded list, or the list itself
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Keywords {
    /// A JSON-encoded list of strings, e.g. `"[\"alpha\"]"`
    Encoded(String),
    /// A list of strings
    List(Vec<String>),
}

/// Body of a task message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Tasks carried by the message
    pub keywords: Keywords,
    /// Extra arguments; carried along but not interpreted by the manager
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl TaskMessage {
    /// Message carrying the given tasks as a plain list
    pub fn new<I>(tasks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            keywords: Keywords::List(tasks.into_iter().map(Into::into).collect()),
            kwargs: serde_json::Map::new(),
        }
    }

    /// Parse a raw message body
    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| Error::Decode(format!("invalid task message: {e}")))
    }

    /// Serialize to a message body
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The tasks, decoding the keywords string if needed
    pub fn tasks(&self) -> Result<Vec<String>> {
        match &self.keywords {
            Keywords::List(tasks) => Ok(tasks.clone()),
            Keywords::Encoded(raw) => serde_json::from_str(raw)
                .map_err(|e| Error::Decode(format!("keywords is not a JSON list of strings: {e}"))),
        }
    }
}
