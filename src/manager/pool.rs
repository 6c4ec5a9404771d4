//! Bounded pool of concurrently running units

use super::assign::AssignOutcome;
use super::consume::ConsumerReport;
use crate::error::Result;
use crate::worker::WorkerReport;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// What a finished unit hands back
pub(crate) enum UnitOutput {
    Worker(WorkerReport),
    Assign(Result<AssignOutcome>),
    Consume(Result<ConsumerReport>),
}

/// Runs at most `size` units at once; further spawns wait for a free slot
pub(crate) struct UnitPool {
    limit: Arc<Semaphore>,
    units: JoinSet<UnitOutput>,
}

impl UnitPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(size)),
            units: JoinSet::new(),
        }
    }

    /// Wait for a slot, then spawn the unit holding it until the unit finishes
    pub(crate) async fn spawn<F>(&mut self, unit: &str, future: F)
    where
        F: Future<Output = UnitOutput> + Send + 'static,
    {
        // The semaphore is never closed
        let permit = self.limit.clone().acquire_owned().await.ok();
        tracing::debug!(
            unit = unit,
            free_slots = self.limit.available_permits(),
            "Spawning pool unit"
        );
        self.units.spawn(async move {
            let _permit = permit;
            future.await
        });
    }

    /// Next finished unit, or `None` once every unit has been joined
    pub(crate) async fn join_next(&mut self) -> Option<std::result::Result<UnitOutput, JoinError>> {
        self.units.join_next().await
    }
}
