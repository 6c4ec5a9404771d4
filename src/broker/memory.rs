//! In-process broker backed by a tokio channel

use super::{Acker, Broker, Delivery, TaskMessage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Broker living inside the process
///
/// Publishing and consuming happen through the same handle. [`close`](Self::close)
/// ends the stream once the already published messages are drained.
pub struct MemoryBroker {
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    published: AtomicUsize,
    acked: Arc<AtomicUsize>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an open broker
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            published: AtomicUsize::new(0),
            acked: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publish a raw body under an optional routing key
    pub fn publish_raw(&self, routing_key: Option<&str>, payload: impl Into<Vec<u8>>) -> Result<()> {
        let guard = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let sender = guard
            .as_ref()
            .ok_or_else(|| Error::Broker("broker is closed".to_string()))?;

        let delivery = Delivery::new(routing_key.map(str::to_string), payload).with_acker(Box::new(
            CountingAcker {
                acked: self.acked.clone(),
            },
        ));
        sender
            .send(delivery)
            .map_err(|_| Error::Broker("broker receiver dropped".to_string()))?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Publish a task message to one tracker
    pub fn publish(&self, routing_key: &str, message: &TaskMessage) -> Result<()> {
        self.publish_raw(Some(routing_key), message.encode()?)
    }

    /// Publish a task message to every tracker
    pub fn publish_fanout(&self, message: &TaskMessage) -> Result<()> {
        self.publish_raw(None, message.encode()?)
    }

    /// Stop accepting messages; consumers see the end after draining
    pub fn close(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Number of messages published
    pub fn published(&self) -> usize {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of deliveries acknowledged
    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn recv(&self) -> Result<Option<Delivery>> {
        Ok(self.receiver.lock().await.recv().await)
    }
}

struct CountingAcker {
    acked: Arc<AtomicUsize>,
}

#[async_trait]
impl Acker for CountingAcker {
    async fn ack(&self) -> Result<()> {
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
