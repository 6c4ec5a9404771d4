//! Manager: binds work groups to trackers and runs them in a bounded pool
//!
//! A run consists of pool units:
//! - one drive loop per worker of every bound group
//! - one assign loop moving tasks from tracker queues into worker inboxes
//! - for a stream provider, one consume loop refilling tracker queues from the broker
//!
//! A group is bound to the tracker with exactly its name. Groups without a
//! tracker stay inert and never run.

mod assign;
mod consume;
mod pool;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use consume::ConsumerReport;

use crate::broker::Broker;
use crate::config::{ManagerConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::provider::{StreamQueue, TaskProvider};
use crate::queue::{TrackerQueue, TrackerStats};
use crate::types::{Event, JobId, StopReason};
use crate::worker::WorkerReport;
use crate::workgroup::{WorkGroup, WorkerList};
use assign::{AssignLoop, Assignment};
use consume::ConsumeLoop;
use pool::{UnitOutput, UnitPool};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Result of a finished run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    /// Job the run belonged to
    pub job_id: JobId,
    /// Tasks handed to workers
    pub tasks_assigned: usize,
    /// One report per worker that ran
    pub workers: Vec<WorkerReport>,
    /// Workers that stopped on a failed task or panicked
    pub failed_workers: usize,
    /// Consume loop counters, for a broker-backed run
    pub consumer: Option<ConsumerReport>,
    /// Whether the run was cut short by shutdown
    pub cancelled: bool,
}

impl RunSummary {
    /// Tasks completed across all workers
    pub fn tasks_completed(&self) -> usize {
        self.workers.iter().map(|w| w.completed).sum()
    }
}

fn first_duplicate<'a>(names: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .find(|name| !seen.insert(*name))
        .map(str::to_string)
}

/// A group bound to its tracker, with the workers it built
struct BoundGroup {
    tracker: Arc<TrackerQueue>,
    workers: WorkerList,
}

/// Orchestrator of one run
pub struct Manager {
    job_id: JobId,
    config: ManagerConfig,
    broker_retry: RetryConfig,
    trackers: Vec<Arc<TrackerQueue>>,
    stream: Option<StreamQueue>,
    broker: Option<Arc<dyn Broker>>,
    bound: Vec<BoundGroup>,
    inert: Vec<String>,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("job_id", &self.job_id)
            .field("config", &self.config)
            .field("trackers", &self.trackers)
            .field("bound_groups", &self.bound_groups())
            .field("inert_groups", &self.inert)
            .field("broker_backed", &self.is_broker_backed())
            .finish()
    }
}

impl Manager {
    /// Build the tracker queues and bind groups to them
    ///
    /// A batch provider's backlog is loaded into the queues here. A stream
    /// provider leaves them empty and requires `broker`.
    ///
    /// # Errors
    /// Returns a configuration error when:
    /// - the manager config is invalid, or the pool cannot fit the assign loop,
    ///   the consume loop and at least one worker
    /// - tracker or group names repeat
    /// - a stream provider has no broker
    /// - no group matches any tracker
    /// - a bound group's qtimeout is not greater than `pop_timeout`
    pub fn new(
        job_id: impl Into<JobId>,
        provider: TaskProvider,
        groups: Vec<WorkGroup>,
        config: ManagerConfig,
        broker: Option<Arc<dyn Broker>>,
    ) -> Result<Self> {
        let job_id = job_id.into();
        config.validate()?;

        if let Some(name) = first_duplicate(provider.tracker_names()) {
            return Err(Error::config(
                format!("tracker '{name}' is declared twice"),
                "provider.trackers",
            ));
        }
        if let Some(name) = first_duplicate(groups.iter().map(WorkGroup::name)) {
            return Err(Error::config(
                format!("work group '{name}' is declared twice"),
                "groups",
            ));
        }

        let (trackers, stream) = match provider {
            TaskProvider::Batch(book) => {
                let trackers = book
                    .pending()
                    .iter()
                    .map(|tracker| {
                        let queue = TrackerQueue::new(&tracker.name);
                        queue.extend(tracker.backlog.iter().cloned());
                        Arc::new(queue)
                    })
                    .collect::<Vec<_>>();
                (trackers, None)
            }
            TaskProvider::Stream(stream) => {
                let trackers = stream
                    .routing_keys()
                    .map(|name| Arc::new(TrackerQueue::new(name)))
                    .collect::<Vec<_>>();
                (trackers, Some(stream))
            }
        };

        let broker = match (&stream, broker) {
            (Some(_), None) => {
                return Err(Error::config(
                    "a stream task provider needs a broker connection",
                    "broker",
                ));
            }
            (None, Some(_)) => {
                tracing::warn!("Ignoring broker connection for a batch task provider");
                None
            }
            (_, broker) => broker,
        };

        let mut bound = Vec::new();
        let mut inert = Vec::new();
        for group in groups {
            let Some(tracker) = trackers.iter().find(|t| t.name() == group.name()) else {
                tracing::warn!(group = %group.name(), "No tracker matches work group, it stays inert");
                inert.push(group.name().to_string());
                continue;
            };

            if let Some(qtimeout) = group.qtimeout() {
                if qtimeout <= config.pop_timeout {
                    return Err(Error::config(
                        format!(
                            "work group '{}' qtimeout ({:?}) must be greater than the manager pop_timeout ({:?})",
                            group.name(),
                            qtimeout,
                            config.pop_timeout
                        ),
                        "group.qtimeout",
                    ));
                }
            }

            tracing::info!(
                tracker = %tracker.name(),
                staff = group.staff(),
                pending = tracker.len(),
                "Bound work group to tracker"
            );
            bound.push(BoundGroup {
                tracker: tracker.clone(),
                workers: group.init_workers(&job_id),
            });
        }

        if bound.is_empty() {
            return Err(Error::config(
                "no work group name matches a tracker name",
                "groups",
            ));
        }

        for tracker in &trackers {
            if !bound.iter().any(|b| Arc::ptr_eq(&b.tracker, tracker)) {
                tracing::warn!(tracker = %tracker.name(), "No work group serves tracker");
            }
        }

        let units = if stream.is_some() { 2 } else { 1 };
        if config.pool_size < units + 1 {
            return Err(Error::config(
                format!(
                    "pool_size {} cannot run the manager loops and a worker (needs at least {})",
                    config.pool_size,
                    units + 1
                ),
                "manager.pool_size",
            ));
        }
        let workers: usize = bound.iter().map(|b| b.workers.len()).sum();
        if config.pool_size < workers + units {
            tracing::warn!(
                pool_size = config.pool_size,
                needed = workers + units,
                "Pool is smaller than the number of units, some workers will wait for a slot"
            );
        }

        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            job_id,
            config,
            broker_retry: RetryConfig::default(),
            trackers,
            stream,
            broker,
            bound,
            inert,
            shutdown: CancellationToken::new(),
            event_tx,
        })
    }

    /// Retry policy for broker receive failures
    pub fn with_broker_retry(mut self, retry: RetryConfig) -> Self {
        self.broker_retry = retry;
        self
    }

    /// Job id of this run
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether tasks arrive from a broker
    pub fn is_broker_backed(&self) -> bool {
        self.broker.is_some()
    }

    /// Names of the groups bound to a tracker
    pub fn bound_groups(&self) -> Vec<&str> {
        self.bound.iter().map(|b| b.tracker.name()).collect()
    }

    /// Names of the groups without a tracker
    pub fn inert_groups(&self) -> &[String] {
        &self.inert
    }

    /// Queue of the named tracker
    pub fn tracker(&self, name: &str) -> Option<Arc<TrackerQueue>> {
        self.trackers.iter().find(|t| t.name() == name).cloned()
    }

    /// Bookkeeping of every tracker
    pub fn tracker_stats(&self) -> HashMap<String, TrackerStats> {
        self.trackers
            .iter()
            .map(|t| (t.name().to_string(), t.stats()))
            .collect()
    }

    /// Token that stops the run when cancelled
    ///
    /// Tasks already handed to a worker still run to completion.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Run every unit in the pool and wait for all of them
    ///
    /// # Errors
    /// Returns [`Error::Stalled`] when every worker stopped while tasks were
    /// pending or could still arrive, or the consume loop's error when the
    /// broker fails beyond its retry policy
    pub async fn run(self) -> Result<RunSummary> {
        let Manager {
            job_id,
            config,
            broker_retry,
            trackers,
            stream,
            broker,
            bound,
            inert: _,
            shutdown,
            event_tx,
        } = self;

        tracing::info!(
            job_id = %job_id,
            pool_size = config.pool_size,
            groups = bound.len(),
            broker_backed = broker.is_some(),
            "Starting run"
        );

        let mut pool = UnitPool::new(config.pool_size);
        let producer_done = CancellationToken::new();

        let mut assignments = Vec::with_capacity(bound.len());
        let mut workers = Vec::new();
        for group in bound {
            let mut inboxes = Vec::with_capacity(group.workers.len());
            for mut worker in group.workers {
                if let Some(inbox) = worker.take_inbox_sender() {
                    inboxes.push((worker.id().clone(), inbox));
                }
                worker.attach_events(event_tx.clone());
                workers.push(worker);
            }
            assignments.push(Assignment {
                tracker: group.tracker,
                inboxes,
            });
        }

        // The assign loop goes first so it always holds a slot
        let assign = AssignLoop {
            assignments,
            pop_timeout: config.pop_timeout,
            should_stop: config.should_stop,
            producer_done: producer_done.clone(),
            shutdown: shutdown.clone(),
            events: event_tx.clone(),
        };
        let consumer_stop = shutdown.child_token();
        let assign_done = consumer_stop.clone();
        pool.spawn("assign", async move {
            let outcome = assign.run().await;
            // Nothing will be handed out anymore; stop consuming
            assign_done.cancel();
            UnitOutput::Assign(outcome)
        })
        .await;

        match (stream, broker) {
            (Some(stream), Some(broker)) => {
                let consume = ConsumeLoop {
                    broker,
                    stream,
                    trackers: trackers
                        .iter()
                        .map(|t| (t.name().to_string(), t.clone()))
                        .collect(),
                    retry: broker_retry,
                    shutdown: consumer_stop,
                    done: producer_done,
                    events: event_tx.clone(),
                };
                pool.spawn("consume", async move { UnitOutput::Consume(consume.run().await) })
                    .await;
            }
            _ => producer_done.cancel(),
        }

        for worker in workers {
            let name = worker.id().to_string();
            pool.spawn(&name, async move { UnitOutput::Worker(worker.run().await) })
                .await;
        }

        let mut summary = RunSummary {
            job_id,
            tasks_assigned: 0,
            workers: Vec::new(),
            failed_workers: 0,
            consumer: None,
            cancelled: false,
        };
        let mut failure = None;

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(UnitOutput::Worker(report)) => {
                    if report.reason == StopReason::Failed {
                        summary.failed_workers += 1;
                    }
                    summary.workers.push(report);
                }
                Ok(UnitOutput::Assign(Ok(outcome))) => {
                    summary.tasks_assigned = outcome.assigned;
                    summary.cancelled = outcome.cancelled;
                }
                Ok(UnitOutput::Assign(Err(e))) => failure = Some(e),
                Ok(UnitOutput::Consume(Ok(report))) => summary.consumer = Some(report),
                Ok(UnitOutput::Consume(Err(e))) => {
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Pool unit panicked");
                    summary.failed_workers += 1;
                }
            }
        }

        summary.workers.sort_by(|a, b| a.worker.cmp(&b.worker));

        if let Some(e) = failure {
            return Err(e);
        }

        tracing::info!(
            job_id = %summary.job_id,
            assigned = summary.tasks_assigned,
            completed = summary.tasks_completed(),
            failed_workers = summary.failed_workers,
            "Run finished"
        );
        Ok(summary)
    }
}
