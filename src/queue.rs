//! Per-tracker FIFO task queue shared by the assign and consume loops

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Snapshot of one tracker's bookkeeping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    /// Tasks waiting in the queue
    pub pending: usize,
    /// Tasks ever handed out
    pub assigned: usize,
    /// Tasks ever enqueued
    pub enqueued: usize,
}

/// Named FIFO queue of string tasks
///
/// Pushes and pops are atomic; no caller holds the lock across an await.
#[derive(Debug)]
pub struct TrackerQueue {
    name: String,
    tasks: Mutex<VecDeque<String>>,
    notify: Notify,
    enqueued: AtomicUsize,
    assigned: AtomicUsize,
}

impl TrackerQueue {
    /// Create an empty queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            enqueued: AtomicUsize::new(0),
            assigned: AtomicUsize::new(0),
        }
    }

    /// Tracker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append one task
    pub fn push(&self, task: impl Into<String>) {
        self.lock().push_back(task.into());
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Append tasks in order; returns how many were added
    pub fn extend<I>(&self, tasks: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let added = {
            let mut queue = self.lock();
            let before = queue.len();
            queue.extend(tasks.into_iter().map(Into::into));
            queue.len() - before
        };
        if added > 0 {
            self.enqueued.fetch_add(added, Ordering::Relaxed);
            self.notify.notify_one();
        }
        added
    }

    /// Put back a task that was popped but never delivered
    ///
    /// It goes to the front so it is the next one handed out, and it no longer
    /// counts as assigned.
    pub fn push_front(&self, task: impl Into<String>) {
        self.lock().push_front(task.into());
        let _ = self
            .assigned
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.notify.notify_one();
    }

    /// Pop the oldest task without waiting
    pub fn try_pop(&self) -> Option<String> {
        let task = self.lock().pop_front();
        if task.is_some() {
            self.assigned.fetch_add(1, Ordering::Relaxed);
        }
        task
    }

    /// Pop the oldest task, waiting up to `timeout` for one to arrive
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a push between check and await is not missed
            notified.as_mut().enable();

            if let Some(task) = self.try_pop() {
                return Some(task);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Number of waiting tasks
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no task is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bookkeeping
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            pending: self.len(),
            assigned: self.assigned.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
