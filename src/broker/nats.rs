//! NATS-backed broker

use super::{Acker, Broker, Delivery};
use crate::error::{Error, Result};
use crate::provider::StreamQueue;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{BoxStream, SelectAll};

/// Broker subscribed to one NATS subject per tracker
///
/// Tracker `t` on exchange `e` listens on subject `e.t`; messages published on
/// the bare subject `e` fan out to every tracker. When a message carries a reply
/// subject, acknowledging it publishes an empty reply.
pub struct NatsBroker {
    client: async_nats::Client,
    exchange: String,
    messages: tokio::sync::Mutex<SelectAll<BoxStream<'static, async_nats::Message>>>,
}

impl NatsBroker {
    /// Connect and subscribe for every tracker of the stream provider
    ///
    /// # Errors
    /// Returns a broker error if the connection or a subscription fails
    pub async fn connect(url: &str, queue: &StreamQueue) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| Error::Broker(format!("failed to connect to {url}: {e}")))?;
        Self::with_client(client, queue).await
    }

    /// Subscribe using an existing client
    ///
    /// # Errors
    /// Returns a broker error if a subscription fails
    pub async fn with_client(client: async_nats::Client, queue: &StreamQueue) -> Result<Self> {
        let exchange = queue.exchange_name().to_string();
        let mut subjects: Vec<String> = queue
            .routing_keys()
            .map(|key| format!("{exchange}.{key}"))
            .collect();
        subjects.push(exchange.clone());

        let mut messages = SelectAll::new();
        for subject in subjects {
            let subscriber = client
                .subscribe(subject.clone())
                .await
                .map_err(|e| Error::Broker(format!("failed to subscribe to {subject}: {e}")))?;
            tracing::info!(subject = %subject, "Subscribed to task subject");
            messages.push(subscriber.boxed());
        }

        Ok(Self {
            client,
            exchange,
            messages: tokio::sync::Mutex::new(messages),
        })
    }

}

/// Tracker named by a subject on `exchange`; `None` for the bare exchange subject
fn routing_key(exchange: &str, subject: &str) -> Option<String> {
    subject
        .strip_prefix(exchange)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Broker for NatsBroker {
    async fn recv(&self) -> Result<Option<Delivery>> {
        let Some(message) = self.messages.lock().await.next().await else {
            return Ok(None);
        };

        let mut delivery = Delivery::new(
            routing_key(&self.exchange, message.subject.as_str()),
            message.payload.to_vec(),
        );
        if let Some(reply) = message.reply {
            delivery = delivery.with_acker(Box::new(ReplyAcker {
                client: self.client.clone(),
                reply: reply.to_string(),
            }));
        }
        Ok(Some(delivery))
    }
}

struct ReplyAcker {
    client: async_nats::Client,
    reply: String,
}

#[async_trait]
impl Acker for ReplyAcker {
    async fn ack(&self) -> Result<()> {
        self.client
            .publish(self.reply.clone(), Default::default())
            .await
            .map_err(|e| Error::Broker(format!("failed to acknowledge: {e}")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_subject_maps_to_routing_key() {
        assert_eq!(
            routing_key("transistor", "transistor.site-A").as_deref(),
            Some("site-A")
        );
    }

    #[test]
    fn test_bare_exchange_subject_has_no_routing_key() {
        assert_eq!(routing_key("transistor", "transistor"), None);
        assert_eq!(routing_key("transistor", "transistor."), None);
    }

    #[test]
    fn test_foreign_subject_has_no_routing_key() {
        assert_eq!(routing_key("transistor", "other.site-A"), None);
        assert_eq!(routing_key("transistor", "transistorx.site-A"), None);
    }
}
