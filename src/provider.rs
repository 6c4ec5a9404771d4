//! Task providers: where the manager's tracker queues get their tasks
//!
//! A [`TaskProvider`] is either a finite [`StatefulBook`] whose backlog is loaded
//! up front, or an open-ended [`StreamQueue`] fed by a message broker. Both
//! expose the same list of named trackers, so the manager and its workers run
//! the same protocol in either mode.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A named target and its initial backlog of tasks
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    /// Tracker name; must equal the name of the work group serving it
    pub name: String,
    /// Tasks in the order they should be handed out
    #[serde(default)]
    pub backlog: Vec<String>,
}

impl Tracker {
    /// Create a tracker with the given backlog
    pub fn new<I>(name: impl Into<String>, backlog: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            name: name.into(),
            backlog: backlog.into_iter().map(Into::into).collect(),
        }
    }
}

/// Finite, pre-loaded set of trackers
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatefulBook {
    trackers: Vec<Tracker>,
}

impl StatefulBook {
    /// Create an empty book
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tracker with its own backlog
    pub fn with_tracker(mut self, tracker: Tracker) -> Self {
        self.trackers.push(tracker);
        self
    }

    /// Give every named tracker a copy of the same task list
    ///
    /// This is the common shape: one list of search terms, scraped on each of
    /// several sites.
    pub fn fanout<T, K>(trackers: T, tasks: K) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        let tasks: Vec<String> = tasks.into_iter().map(Into::into).collect();
        Self {
            trackers: trackers
                .into_iter()
                .map(|name| Tracker::new(name, tasks.iter().cloned()))
                .collect(),
        }
    }

    /// Trackers with their pending backlogs
    pub fn pending(&self) -> &[Tracker] {
        &self.trackers
    }

    /// Total number of tasks across all trackers
    pub fn total_tasks(&self) -> usize {
        self.trackers.iter().map(|t| t.backlog.len()).sum()
    }
}

/// Where a broker delivery should be enqueued
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route<'a> {
    /// Only the named tracker
    Tracker(&'a str),
    /// Every tracker
    All,
    /// No tracker matches the routing key
    Unknown,
}

/// Open-ended provider: one broker queue per tracker behind a direct exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamQueue {
    trackers: Vec<String>,
    #[serde(default = "default_exchange_name")]
    exchange_name: String,
    #[serde(default = "default_exchange_type")]
    exchange_type: String,
}

impl StreamQueue {
    /// Declare one queue per tracker on the default "transistor" direct exchange
    pub fn new<I>(trackers: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            trackers: trackers.into_iter().map(Into::into).collect(),
            exchange_name: default_exchange_name(),
            exchange_type: default_exchange_type(),
        }
    }

    /// Use a different exchange name
    pub fn with_exchange(mut self, name: impl Into<String>) -> Self {
        self.exchange_name = name.into();
        self
    }

    /// Tracker names
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    /// Exchange name
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// Exchange type
    pub fn exchange_type(&self) -> &str {
        &self.exchange_type
    }

    /// Routing key of each tracker queue (the tracker name itself)
    pub fn routing_keys(&self) -> impl Iterator<Item = &str> {
        self.trackers.iter().map(String::as_str)
    }

    /// Resolve a delivery's routing key to its destination
    pub fn route<'a>(&'a self, routing_key: Option<&str>) -> Route<'a> {
        match routing_key {
            None => Route::All,
            Some(key) => self
                .trackers
                .iter()
                .find(|t| t.as_str() == key)
                .map(|t| Route::Tracker(t.as_str()))
                .unwrap_or(Route::Unknown),
        }
    }
}

fn default_exchange_name() -> String {
    "transistor".to_string()
}

fn default_exchange_type() -> String {
    "direct".to_string()
}

/// Source of tasks for one run
///
/// Serialized with a `kind` tag: `{"kind": "batch", "trackers": [...]}` or
/// `{"kind": "stream", "trackers": [...]}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskProvider {
    /// Finite backlog, loaded into tracker queues before the run starts
    Batch(StatefulBook),
    /// Empty queues refilled from a broker while the run lasts
    Stream(StreamQueue),
}

impl TaskProvider {
    /// Build a provider from its JSON description
    ///
    /// # Errors
    /// Returns a configuration error when the `kind` is missing or unrecognized,
    /// or the body does not fit that kind
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::config(format!("unsupported task provider: {e}"), "provider.kind"))
    }

    /// Names of every tracker this provider feeds
    pub fn tracker_names(&self) -> Vec<&str> {
        match self {
            TaskProvider::Batch(book) => book.pending().iter().map(|t| t.name.as_str()).collect(),
            TaskProvider::Stream(queue) => queue.routing_keys().collect(),
        }
    }

    /// Whether tasks arrive from a broker
    pub fn is_stream(&self) -> bool {
        matches!(self, TaskProvider::Stream(_))
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            TaskProvider::Batch(_) => "batch",
            TaskProvider::Stream(_) => "stream",
        }
    }
}

impl From<StatefulBook> for TaskProvider {
    fn from(book: StatefulBook) -> Self {
        TaskProvider::Batch(book)
    }
}

impl From<StreamQueue> for TaskProvider {
    fn from(queue: StreamQueue) -> Self {
        TaskProvider::Stream(queue)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fanout_copies_tasks_to_every_tracker() {
        let book = StatefulBook::fanout(["mouser.com", "digikey.com"], ["LM317", "NE555"]);

        assert_eq!(book.pending().len(), 2);
        for tracker in book.pending() {
            assert_eq!(tracker.backlog, vec!["LM317", "NE555"]);
        }
        assert_eq!(book.total_tasks(), 4);
    }

    #[test]
    fn test_stream_queue_defaults() {
        let queue = StreamQueue::new(["site-A", "site-B"]);
        assert_eq!(queue.exchange_name(), "transistor");
        assert_eq!(queue.exchange_type(), "direct");
        assert_eq!(queue.routing_keys().collect::<Vec<_>>(), vec!["site-A", "site-B"]);
    }

    #[test]
    fn test_routing() {
        let queue = StreamQueue::new(["site-A", "site-B"]);
        assert_eq!(queue.route(Some("site-B")), Route::Tracker("site-B"));
        assert_eq!(queue.route(None), Route::All);
        assert_eq!(queue.route(Some("site-C")), Route::Unknown);
    }

    #[test]
    fn test_provider_from_json() {
        let provider = TaskProvider::from_json(serde_json::json!({
            "kind": "batch",
            "trackers": [{"name": "site-A", "backlog": ["alpha", "beta"]}]
        }))
        .unwrap();
        assert_eq!(provider.tracker_names(), vec!["site-A"]);

        let provider = TaskProvider::from_json(serde_json::json!({
            "kind": "stream",
            "trackers": ["site-A"]
        }))
        .unwrap();
        let TaskProvider::Stream(queue) = provider else {
            panic!("expected stream provider");
        };
        assert_eq!(queue.exchange_name(), "transistor");
    }

    #[test]
    fn test_unknown_provider_kind_is_config_error() {
        let err = TaskProvider::from_json(serde_json::json!({
            "kind": "spreadsheet",
            "trackers": []
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "provider.kind"));
    }

    #[test]
    fn test_provider_tracker_names() {
        let batch = TaskProvider::from(
            StatefulBook::new()
                .with_tracker(Tracker::new("site-A", ["alpha"]))
                .with_tracker(Tracker::new("site-B", Vec::<String>::new())),
        );
        assert_eq!(batch.tracker_names(), vec!["site-A", "site-B"]);
        assert!(!batch.is_stream());

        let stream = TaskProvider::from(StreamQueue::new(["site-A"]));
        assert_eq!(stream.tracker_names(), vec!["site-A"]);
        assert!(stream.is_stream());
        assert_eq!(stream.kind(), "stream");
    }
}
