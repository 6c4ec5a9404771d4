//! Core types for transistor

use serde::{Deserialize, Serialize};

/// Free-form arguments a work group passes to its scrapers
pub type Kwargs = serde_json::Map<String, serde_json::Value>;

/// Identifier grouping every result produced by one run
///
/// The special value `"NONE"` means "do not persist": workers still drive their
/// tasks and run hooks, but skip the export stage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Job id meaning "do not persist results"
    pub const NONE: &'static str = "NONE";

    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The non-persisting job id
    pub fn none() -> Self {
        Self(Self::NONE.to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether results for this job should be exported
    pub fn should_persist(&self) -> bool {
        self.0 != Self::NONE
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one worker: its group name plus a 1-indexed ordinal
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId {
    /// Group (and tracker) name
    pub name: String,
    /// 1-indexed worker number within the group
    pub number: usize,
}

impl WorkerId {
    /// Create a new WorkerId
    pub fn new(name: impl Into<String>, number: usize) -> Self {
        Self {
            name: name.into(),
            number,
        }
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.number)
    }
}

/// Why a worker's drive loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The inbox stayed empty longer than the worker's qtimeout
    Idle,
    /// The manager closed the inbox: no more work will be handed out
    InboxClosed,
    /// A task raised an error and terminated the worker unit
    Failed,
}

/// Events emitted during a run
///
/// Subscribe with [`Manager::subscribe`](crate::Manager::subscribe).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The assign loop handed a task to a worker inbox
    TaskAssigned {
        /// Tracker the task came from
        tracker: String,
        /// Receiving worker
        worker: WorkerId,
        /// The task
        task: String,
    },

    /// A worker pulled a task from its inbox and started driving it
    TaskStarted {
        /// Worker driving the task
        worker: WorkerId,
        /// The task
        task: String,
    },

    /// A task went through session, hooks and export
    TaskCompleted {
        /// Worker that drove the task
        worker: WorkerId,
        /// The task
        task: String,
        /// Last status returned by the rendering session
        status: u16,
        /// Number of replays the session needed
        retries: u32,
    },

    /// A task raised an error; its worker unit terminates
    TaskFailed {
        /// Worker that drove the task
        worker: WorkerId,
        /// The task
        task: String,
        /// Error message
        error: String,
    },

    /// Every matched tracker queue was empty for one full sweep
    TrackersExhausted {
        /// Total tasks handed out so far
        assigned: usize,
    },

    /// A worker's drive loop ended
    WorkerStopped {
        /// The worker
        worker: WorkerId,
        /// Why it stopped
        reason: StopReason,
        /// Tasks it completed
        completed: usize,
    },

    /// The consume loop decoded a broker message into tracker queues
    TasksEnqueued {
        /// Tracker receiving the tasks
        tracker: String,
        /// Number of tasks enqueued
        count: usize,
    },

    /// A broker message could not be decoded; it was acknowledged and dropped
    BrokerMessageRejected {
        /// Decode error
        error: String,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_job_id_does_not_persist() {
        assert!(!JobId::none().should_persist());
        assert!(!JobId::from("NONE").should_persist());
        assert!(JobId::from("books_job").should_persist());
        // the sentinel is case sensitive
        assert!(JobId::from("none").should_persist());
    }

    #[test]
    fn worker_id_displays_name_and_number() {
        let id = WorkerId::new("books.toscrape.com", 3);
        assert_eq!(id.to_string(), "books.toscrape.com-3");
    }

    #[test]
    fn job_id_serializes_transparently() {
        let json = serde_json::to_string(&JobId::new("job_1")).unwrap();
        assert_eq!(json, "\"job_1\"");
    }

    #[test]
    fn events_are_tagged() {
        let event = Event::TasksEnqueued {
            tracker: "site-A".to_string(),
            count: 2,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tasks_enqueued");
        assert_eq!(value["tracker"], "site-A");
        assert_eq!(value["count"], 2);
    }
}
