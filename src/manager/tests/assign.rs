use super::*;
use tokio::sync::Semaphore;

#[tokio::test]
async fn test_batch_run_delivers_every_task_exactly_once() {
    let store = Arc::new(MemoryJobStore::new());
    let job = JobId::new("books_job");
    let tasks = ["alpha", "beta", "gamma", "delta", "epsilon"];
    let manager = Manager::new(
        job.clone(),
        StatefulBook::fanout(["site-A", "site-B"], tasks).into(),
        vec![group("site-A", 2, &store), group("site-B", 3, &store)],
        fast_config(),
        None,
    )
    .unwrap();

    let summary = manager.run().await.unwrap();

    let mut expected: Vec<String> = tasks.iter().map(|t| t.to_string()).collect();
    expected.sort();
    assert_eq!(exported_tasks(&store, &job, "site-A").await, expected);
    assert_eq!(exported_tasks(&store, &job, "site-B").await, expected);

    assert_eq!(summary.tasks_assigned, 10);
    assert_eq!(summary.tasks_completed(), 10);
    assert_eq!(summary.failed_workers, 0);
    assert!(!summary.cancelled);
    assert_eq!(summary.workers.len(), 5);
    assert!(summary.workers.iter().all(|w| w.reason == StopReason::InboxClosed));
}

#[tokio::test]
async fn test_workers_only_receive_tasks_from_their_tracker() {
    let store = Arc::new(MemoryJobStore::new());
    let job = JobId::new("job");
    let book = StatefulBook::new()
        .with_tracker(Tracker::new("site-A", ["a1", "a2"]))
        .with_tracker(Tracker::new("site-B", ["b1"]));
    let manager = Manager::new(
        job.clone(),
        book.into(),
        vec![group("site-A", 1, &store), group("site-B", 1, &store)],
        fast_config(),
        None,
    )
    .unwrap();
    let mut events = manager.subscribe();

    manager.run().await.unwrap();

    while let Ok(event) = events.try_recv() {
        if let Event::TaskAssigned { tracker, worker, task } = event {
            assert_eq!(worker.name, tracker);
            assert!(task.starts_with(if tracker == "site-A" { "a" } else { "b" }));
        }
    }
    assert_eq!(exported_tasks(&store, &job, "site-A").await, vec!["a1", "a2"]);
    assert_eq!(exported_tasks(&store, &job, "site-B").await, vec!["b1"]);
}

#[tokio::test]
async fn test_exhaustion_is_announced() {
    let store = Arc::new(MemoryJobStore::new());
    let manager = Manager::new(
        "job",
        StatefulBook::fanout(["site-A"], ["alpha", "beta"]).into(),
        vec![group("site-A", 1, &store)],
        fast_config(),
        None,
    )
    .unwrap();
    let mut events = manager.subscribe();

    manager.run().await.unwrap();

    let mut exhausted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::TrackersExhausted { assigned } = event {
            exhausted.push(assigned);
        }
    }
    assert_eq!(exhausted, vec![2]);
}

#[tokio::test]
async fn test_empty_backlog_terminates() {
    let store = Arc::new(MemoryJobStore::new());
    let manager = Manager::new(
        "job",
        StatefulBook::fanout(["site-A"], Vec::<String>::new()).into(),
        vec![group("site-A", 2, &store)],
        fast_config(),
        None,
    )
    .unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(2), manager.run())
        .await
        .expect("run should end on an empty backlog")
        .unwrap();
    assert_eq!(summary.tasks_assigned, 0);
    assert_eq!(summary.workers.len(), 2);
}

#[tokio::test]
async fn test_busy_worker_holds_at_most_two_tasks() {
    let gate = Arc::new(Semaphore::new(0));
    let group = WorkGroup::builder("site-A", 1, gated_factory(gate.clone()))
        .build()
        .unwrap();
    let manager = Manager::new(
        "job",
        StatefulBook::fanout(["site-A"], ["t1", "t2", "t3", "t4", "t5"]).into(),
        vec![group],
        fast_config(),
        None,
    )
    .unwrap();
    let tracker = manager.tracker("site-A").unwrap();
    let run = tokio::spawn(manager.run());

    // one task in progress, one waiting in the inbox, the rest stay queued
    wait_for(|| tracker.len() == 3).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracker.len(), 3);
    assert_eq!(tracker.stats().assigned, 2);

    gate.add_permits(5);
    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.tasks_completed(), 5);
    assert!(tracker.is_empty());
}

#[tokio::test]
async fn test_small_pool_runs_workers_in_turns() {
    let store = Arc::new(MemoryJobStore::new());
    let job = JobId::new("job");
    let config = ManagerConfig {
        pool_size: 2,
        ..fast_config()
    };
    let manager = Manager::new(
        job.clone(),
        StatefulBook::fanout(["site-A"], ["alpha", "beta", "gamma"]).into(),
        vec![group("site-A", 3, &store)],
        config,
        None,
    )
    .unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), manager.run())
        .await
        .expect("run should finish with a small pool")
        .unwrap();

    assert_eq!(summary.workers.len(), 3);
    assert_eq!(summary.tasks_completed(), 3);
    assert_eq!(
        exported_tasks(&store, &job, "site-A").await,
        vec!["alpha", "beta", "gamma"]
    );
}

#[tokio::test]
async fn test_run_stalls_when_every_worker_failed() {
    let group = WorkGroup::builder("site-A", 1, failing_factory())
        .build()
        .unwrap();
    let manager = Manager::new(
        "job",
        StatefulBook::fanout(["site-A"], ["alpha", "beta", "gamma", "delta"]).into(),
        vec![group],
        fast_config(),
        None,
    )
    .unwrap();

    let err = manager.run().await.unwrap_err();
    assert!(matches!(err, Error::Stalled { pending } if pending >= 1));
}

#[tokio::test]
async fn test_shutdown_stops_assigning_but_finishes_held_tasks() {
    let gate = Arc::new(Semaphore::new(0));
    let group = WorkGroup::builder("site-A", 1, gated_factory(gate.clone()))
        .build()
        .unwrap();
    let manager = Manager::new(
        "job",
        StatefulBook::fanout(["site-A"], ["t1", "t2", "t3", "t4"]).into(),
        vec![group],
        fast_config(),
        None,
    )
    .unwrap();
    let tracker = manager.tracker("site-A").unwrap();
    let shutdown = manager.shutdown_handle();
    let run = tokio::spawn(manager.run());

    wait_for(|| tracker.stats().assigned == 2).await;
    shutdown.cancel();
    gate.add_permits(10);

    let summary = run.await.unwrap().unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.tasks_assigned, 2);
    assert_eq!(summary.tasks_completed(), 2);
    assert_eq!(tracker.len(), 2);
}

#[tokio::test]
async fn test_none_job_runs_without_exporting() {
    let store = Arc::new(MemoryJobStore::new());
    let manager = Manager::new(
        JobId::none(),
        StatefulBook::fanout(["site-A"], ["alpha"]).into(),
        vec![group("site-A", 1, &store)],
        fast_config(),
        None,
    )
    .unwrap();

    let summary = manager.run().await.unwrap();
    assert_eq!(summary.tasks_completed(), 1);
    assert_eq!(store.count(&JobId::none()), 0);
}
