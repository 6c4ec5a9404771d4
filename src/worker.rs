//! Worker: drains a depth-1 inbox and drives one scraper per task
//!
//! The manager owns the sending half of every inbox. A worker stops when its
//! inbox closes (the manager will hand out nothing more), when it stays empty
//! past the worker's `qtimeout`, or when a task fails.

use crate::config::RenderTimeout;
use crate::error::Result;
use crate::export::{Exporter, ItemLoader};
use crate::scraper::{Scraper, ScraperContext, ScraperFactory};
use crate::types::{Event, JobId, Kwargs, StopReason, WorkerId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Inbox depth; the assign loop blocks once a worker holds this many undelivered tasks
pub const INBOX_CAPACITY: usize = 1;

/// Hooks around the export stage of every task
///
/// Both default to doing nothing. An error fails the task like any other.
#[async_trait]
pub trait WorkerHooks: Send + Sync {
    /// Runs after the scraper finished, before its items are exported
    async fn pre_export(&self, _worker: &WorkerId, _scraper: &dyn Scraper, _task: &str) -> Result<()> {
        Ok(())
    }

    /// Runs after the items were exported
    async fn post_export(&self, _worker: &WorkerId, _scraper: &dyn Scraper, _task: &str) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl WorkerHooks for NoHooks {}

/// Configuration every worker of one group shares
pub(crate) struct WorkerShared {
    pub(crate) factory: Arc<dyn ScraperFactory>,
    pub(crate) loader: Arc<dyn ItemLoader>,
    pub(crate) exporters: Vec<Arc<dyn Exporter>>,
    pub(crate) hooks: Arc<dyn WorkerHooks>,
    pub(crate) url: Option<String>,
    pub(crate) timeout: RenderTimeout,
    pub(crate) kwargs: Kwargs,
    pub(crate) qtimeout: Option<Duration>,
}

/// How a worker's drive loop ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// The worker
    pub worker: WorkerId,
    /// Tasks completed
    pub completed: usize,
    /// Why the loop ended
    pub reason: StopReason,
    /// Error that ended the loop, if any
    pub error: Option<String>,
    /// Tasks left undelivered in the inbox when the worker stopped
    pub unprocessed: Vec<String>,
}

/// One member of a work group
pub struct Worker {
    id: WorkerId,
    job_id: JobId,
    shared: Arc<WorkerShared>,
    inbox: mpsc::Receiver<String>,
    inbox_tx: Option<mpsc::Sender<String>>,
    events: Option<broadcast::Sender<Event>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("job_id", &self.job_id)
            .field("qtimeout", &self.shared.qtimeout)
            .finish()
    }
}

impl Worker {
    pub(crate) fn new(id: WorkerId, job_id: JobId, shared: Arc<WorkerShared>) -> Self {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        Self {
            id,
            job_id,
            shared,
            inbox: rx,
            inbox_tx: Some(tx),
            events: None,
        }
    }

    /// Worker identity
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.id.name
    }

    /// 1-indexed ordinal within the group
    pub fn number(&self) -> usize {
        self.id.number
    }

    /// Job the worker's results belong to
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Longest the worker waits on an empty inbox; `None` waits until it closes
    pub fn qtimeout(&self) -> Option<Duration> {
        self.shared.qtimeout
    }

    /// Take the sending half of the inbox
    ///
    /// The worker keeps no sender of its own, so once the returned sender is
    /// dropped the inbox closes and the worker stops after draining it.
    pub fn take_inbox_sender(&mut self) -> Option<mpsc::Sender<String>> {
        self.inbox_tx.take()
    }

    pub(crate) fn attach_events(&mut self, events: broadcast::Sender<Event>) {
        self.events = Some(events);
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(event);
        }
    }

    /// Drive loop: one task at a time until the inbox closes, idles out, or a task fails
    pub async fn run(mut self) -> WorkerReport {
        // A worker run on its own must still see its inbox close
        self.inbox_tx = None;
        let mut completed = 0;
        let mut error = None;

        let reason = loop {
            let next = match self.shared.qtimeout {
                Some(qtimeout) => match tokio::time::timeout(qtimeout, self.inbox.recv()).await {
                    Ok(next) => next,
                    Err(_) => break StopReason::Idle,
                },
                None => self.inbox.recv().await,
            };
            let Some(task) = next else {
                break StopReason::InboxClosed;
            };

            tracing::info!(worker = %self.id, task = %task, "Worker got task");
            self.emit(Event::TaskStarted {
                worker: self.id.clone(),
                task: task.clone(),
            });

            match self.process(&task).await {
                Ok((status, retries)) => {
                    completed += 1;
                    tracing::info!(
                        worker = %self.id,
                        task = %task,
                        status,
                        retries,
                        "Task finished"
                    );
                    self.emit(Event::TaskCompleted {
                        worker: self.id.clone(),
                        task,
                        status,
                        retries,
                    });
                }
                Err(e) => {
                    tracing::error!(worker = %self.id, task = %task, error = %e, "Task failed, stopping worker");
                    self.emit(Event::TaskFailed {
                        worker: self.id.clone(),
                        task,
                        error: e.to_string(),
                    });
                    error = Some(e.to_string());
                    break StopReason::Failed;
                }
            }

            tokio::task::yield_now().await;
        };

        // Closing still lets an outstanding permit send, so wait those out too
        self.inbox.close();
        let mut unprocessed = Vec::new();
        while let Some(task) = self.inbox.recv().await {
            unprocessed.push(task);
        }
        if !unprocessed.is_empty() {
            tracing::warn!(worker = %self.id, tasks = ?unprocessed, "Worker stopped with tasks in its inbox");
        }

        tracing::info!(worker = %self.id, completed, reason = ?reason, "Quitting time for worker");
        self.emit(Event::WorkerStopped {
            worker: self.id.clone(),
            reason,
            completed,
        });

        WorkerReport {
            worker: self.id,
            completed,
            reason,
            error,
            unprocessed,
        }
    }

    /// Scrape, then pre-export hook, export, post-export hook
    async fn process(&self, task: &str) -> Result<(u16, u32)> {
        let ctx = ScraperContext {
            name: self.id.name.clone(),
            number: self.id.number,
            job_id: self.job_id.clone(),
            url: self.shared.url.clone(),
            timeout: self.shared.timeout,
            kwargs: self.shared.kwargs.clone(),
        };
        let mut scraper = self.shared.factory.build(task, &ctx)?;
        scraper
            .start(self.shared.url.as_deref(), Some(self.shared.timeout))
            .await?;

        self.shared
            .hooks
            .pre_export(&self.id, scraper.as_ref(), task)
            .await?;

        if self.job_id.should_persist() {
            let items = self.shared.loader.write(scraper.as_ref())?;
            for exporter in &self.shared.exporters {
                exporter.export_item(&self.job_id, &items).await?;
            }
        }

        self.shared
            .hooks
            .post_export(&self.id, scraper.as_ref(), task)
            .await?;

        let session = scraper.session();
        Ok((session.status(), session.retries()))
    }
}
