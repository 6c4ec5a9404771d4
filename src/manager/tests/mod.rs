use super::test_helpers::*;
use super::*;
use crate::broker::MemoryBroker;
use crate::export::{JobStore, MemoryJobStore};
use crate::provider::{StatefulBook, Tracker};
use std::time::Duration;

mod assign;

/// Task values exported for one tracker, sorted
async fn exported_tasks(store: &MemoryJobStore, job: &JobId, tracker: &str) -> Vec<String> {
    let mut tasks: Vec<String> = store
        .get_job_results(job)
        .await
        .unwrap_or_default()
        .iter()
        .filter(|item| item["name"] == tracker)
        .map(|item| item["task"].as_str().unwrap().to_string())
        .collect();
    tasks.sort();
    tasks
}

/// Poll until `check` holds, failing after two seconds
async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
