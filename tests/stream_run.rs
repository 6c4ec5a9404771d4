//! Broker-fed runs against a mock Splash endpoint

mod common;

use common::{drain_events, fast_manager_config, splash_factory, splash_server};
use std::sync::Arc;
use std::time::Duration;
use transistor::broker::{Broker, MemoryBroker, TaskMessage};
use transistor::export::{JobStore, MemoryJobStore};
use transistor::{Event, JobId, Manager, ManagerConfig, StreamQueue, WorkGroup};

#[tokio::test]
async fn test_stream_run_consumes_published_keywords() {
    let server = splash_server().await;
    let store = Arc::new(MemoryJobStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let job = JobId::new("stream_job");

    let group = WorkGroup::builder("site-A", 1, splash_factory(&server, "site-a.test"))
        .exporter(store.clone())
        .build()
        .unwrap();
    let broker_handle: Arc<dyn Broker> = broker.clone();
    let manager = Manager::new(
        job.clone(),
        StreamQueue::new(["site-A"]).into(),
        vec![group],
        fast_manager_config(),
        Some(broker_handle),
    )
    .unwrap();
    let mut events = manager.subscribe();

    broker
        .publish_raw(Some("site-A"), r#"{"keywords": "[\"alpha\"]", "kwargs": {}}"#)
        .unwrap();
    broker.close();

    let summary = tokio::time::timeout(Duration::from_secs(5), manager.run())
        .await
        .expect("run should end once the broker closes")
        .unwrap();

    let results = store.get_job_results(&job).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["task"], "alpha");
    assert_eq!(results[0]["url"], "https://site-a.test/search?q=alpha");
    assert_eq!(broker.acked(), 1);
    assert_eq!(summary.consumer.unwrap().enqueued, 1);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::TasksEnqueued { tracker, count: 1 } if tracker == "site-A"
    )));
}

#[tokio::test]
async fn test_stream_run_with_should_stop() {
    let server = splash_server().await;
    let store = Arc::new(MemoryJobStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let job = JobId::new("stream_job");

    let groups = ["site-A", "site-B"]
        .into_iter()
        .map(|site| {
            WorkGroup::builder(site, 2, splash_factory(&server, site))
                .exporter(store.clone())
                .build()
                .unwrap()
        })
        .collect();
    let config = ManagerConfig {
        should_stop: true,
        ..fast_manager_config()
    };
    let broker_handle: Arc<dyn Broker> = broker.clone();
    let manager = Manager::new(
        job.clone(),
        StreamQueue::new(["site-A", "site-B"]).into(),
        groups,
        config,
        Some(broker_handle),
    )
    .unwrap();

    broker
        .publish_fanout(&TaskMessage::new(["alpha", "beta"]))
        .unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), manager.run())
        .await
        .expect("should_stop ends the run without closing the broker")
        .unwrap();

    assert_eq!(summary.tasks_completed(), 4);
    assert_eq!(store.get_job_results(&job).await.unwrap().len(), 4);
}
