//! Consume loop: refills tracker queues from the broker

use crate::broker::{Broker, Delivery, TaskMessage};
use crate::config::RetryConfig;
use crate::error::Result;
use crate::provider::{Route, StreamQueue};
use crate::queue::TrackerQueue;
use crate::retry::with_retry;
use crate::types::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Counters of the consume loop
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerReport {
    /// Deliveries received
    pub messages: usize,
    /// Tasks enqueued across all trackers
    pub enqueued: usize,
    /// Deliveries acknowledged and dropped (undecodable or unroutable)
    pub rejected: usize,
}

pub(crate) struct ConsumeLoop {
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) stream: StreamQueue,
    pub(crate) trackers: HashMap<String, Arc<TrackerQueue>>,
    pub(crate) retry: RetryConfig,
    pub(crate) shutdown: CancellationToken,
    /// Cancelled when this loop ends, so the assign loop knows nothing more arrives
    pub(crate) done: CancellationToken,
    pub(crate) events: broadcast::Sender<Event>,
}

impl ConsumeLoop {
    pub(crate) async fn run(self) -> Result<ConsumerReport> {
        let result = self.consume().await;
        self.done.cancel();
        if let Err(e) = &result {
            tracing::error!(error = %e, "Consume loop failed");
        }
        result
    }

    async fn consume(&self) -> Result<ConsumerReport> {
        let mut report = ConsumerReport::default();
        tracing::info!(
            exchange = %self.stream.exchange_name(),
            trackers = ?self.stream.trackers(),
            "Consuming task messages"
        );

        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = with_retry(&self.retry, || self.broker.recv()) => next?,
            };
            let Some(delivery) = next else {
                tracing::info!("Broker closed, no more tasks will arrive");
                break;
            };

            report.messages += 1;
            self.process_task(delivery, &mut report).await;
            tokio::task::yield_now().await;
        }

        Ok(report)
    }

    /// Decode, enqueue, then acknowledge
    ///
    /// Undecodable and unroutable deliveries are acknowledged too, so a poison
    /// message is dropped instead of redelivered forever.
    async fn process_task(&self, delivery: Delivery, report: &mut ConsumerReport) {
        let route = self.stream.route(delivery.routing_key.as_deref());

        let targets: Vec<&str> = match route {
            Route::Tracker(name) => vec![name],
            Route::All => self.stream.routing_keys().collect(),
            Route::Unknown => {
                tracing::warn!(
                    routing_key = ?delivery.routing_key,
                    "Dropping message for unknown tracker"
                );
                let _ = self.events.send(Event::BrokerMessageRejected {
                    error: format!("unknown routing key {:?}", delivery.routing_key),
                });
                report.rejected += 1;
                Vec::new()
            }
        };

        if !targets.is_empty() {
            match TaskMessage::decode(&delivery.payload).and_then(|m| m.tasks()) {
                Ok(tasks) => {
                    for name in targets {
                        let Some(queue) = self.trackers.get(name) else {
                            continue;
                        };
                        let count = queue.extend(tasks.iter().cloned());
                        tracing::info!(tracker = %name, count, "Enqueued tasks from broker");
                        report.enqueued += count;
                        let _ = self.events.send(Event::TasksEnqueued {
                            tracker: name.to_string(),
                            count,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable task message");
                    report.rejected += 1;
                    let _ = self.events.send(Event::BrokerMessageRejected {
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = delivery.ack().await {
            tracing::warn!(error = %e, "Failed to acknowledge task message");
        }
    }
}
