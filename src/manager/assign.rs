//! Assign loop: moves tasks from tracker queues into worker inboxes

use crate::error::{Error, Result};
use crate::queue::TrackerQueue;
use crate::types::{Event, WorkerId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// One tracker and the inboxes of the group bound to it
pub(crate) struct Assignment {
    pub(crate) tracker: Arc<TrackerQueue>,
    pub(crate) inboxes: Vec<(WorkerId, mpsc::Sender<String>)>,
}

/// How the assign loop ended
#[derive(Debug, Default)]
pub(crate) struct AssignOutcome {
    pub(crate) assigned: usize,
    pub(crate) cancelled: bool,
}

#[derive(Debug, Default)]
struct Sweep {
    delivered: usize,
    live: usize,
    cancelled: bool,
}

pub(crate) struct AssignLoop {
    pub(crate) assignments: Vec<Assignment>,
    pub(crate) pop_timeout: Duration,
    pub(crate) should_stop: bool,
    /// Cancelled once no producer can add tasks anymore (always, for a batch run)
    pub(crate) producer_done: CancellationToken,
    pub(crate) shutdown: CancellationToken,
    pub(crate) events: broadcast::Sender<Event>,
}

impl AssignLoop {
    /// Sweep until the trackers are exhausted, every worker is gone, or shutdown
    ///
    /// Returning drops every inbox sender, which is how workers learn that no
    /// more work is coming.
    pub(crate) async fn run(self) -> Result<AssignOutcome> {
        let mut outcome = AssignOutcome::default();
        let mut idle = false;

        loop {
            let sweep = self.sweep().await;
            outcome.assigned += sweep.delivered;

            if sweep.cancelled || self.shutdown.is_cancelled() {
                tracing::info!(assigned = outcome.assigned, "Assign loop cancelled");
                outcome.cancelled = true;
                return Ok(outcome);
            }

            // Producer state first: once it reads done, every enqueue is visible
            let producing = !self.producer_done.is_cancelled();
            let pending = self.pending();

            if sweep.live == 0 {
                if pending > 0 || producing {
                    tracing::error!(pending, "Every worker has stopped while work remains");
                    return Err(Error::Stalled { pending });
                }
                return Ok(outcome);
            }

            if sweep.delivered == 0 && pending == 0 {
                if !idle {
                    tracing::info!(assigned = outcome.assigned, "All tracker queues are empty");
                    let _ = self.events.send(Event::TrackersExhausted {
                        assigned: outcome.assigned,
                    });
                    idle = true;
                }
                if !producing {
                    return Ok(outcome);
                }
                if self.should_stop && outcome.assigned > 0 {
                    tracing::info!("Stop requested once trackers are exhausted");
                    return Ok(outcome);
                }
            } else if sweep.delivered > 0 {
                idle = false;
            }

            tokio::task::yield_now().await;
        }
    }

    /// Tasks waiting in the matched tracker queues
    fn pending(&self) -> usize {
        self.assignments.iter().map(|a| a.tracker.len()).sum()
    }

    /// One pass over every (tracker, worker) pair
    ///
    /// Each handoff first reserves the worker's inbox slot, then pops the
    /// tracker, then commits; a task is never held outside both queues. A task
    /// popped for a worker that closed its inbox meanwhile goes back to the
    /// front of its tracker. A tracker whose pop times out is skipped for the
    /// rest of the sweep.
    async fn sweep(&self) -> Sweep {
        let mut sweep = Sweep {
            live: self
                .assignments
                .iter()
                .flat_map(|a| a.inboxes.iter())
                .filter(|(_, inbox)| !inbox.is_closed())
                .count(),
            ..Default::default()
        };

        for assignment in &self.assignments {
            for (worker, inbox) in &assignment.inboxes {
                if inbox.is_closed() {
                    continue;
                }

                let reserved = tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        sweep.cancelled = true;
                        return sweep;
                    }
                    reserved = tokio::time::timeout(self.pop_timeout, inbox.reserve()) => reserved,
                };
                let permit = match reserved {
                    Ok(Ok(permit)) => permit,
                    // Worker gone, or still busy with a full inbox
                    Ok(Err(_)) | Err(_) => continue,
                };

                let task = tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        sweep.cancelled = true;
                        return sweep;
                    }
                    task = assignment.tracker.pop_timeout(self.pop_timeout) => task,
                };
                let Some(task) = task else {
                    break;
                };
                // The worker may have idled out while the pop was waiting
                if inbox.is_closed() {
                    tracing::debug!(
                        tracker = %assignment.tracker.name(),
                        worker = %worker,
                        task = %task,
                        "Worker closed its inbox, requeueing task"
                    );
                    drop(permit);
                    assignment.tracker.push_front(task);
                    continue;
                }

                tracing::debug!(
                    tracker = %assignment.tracker.name(),
                    worker = %worker,
                    task = %task,
                    "Assigning task"
                );
                let _ = self.events.send(Event::TaskAssigned {
                    tracker: assignment.tracker.name().to_string(),
                    worker: worker.clone(),
                    task: task.clone(),
                });
                permit.send(task);
                sweep.delivered += 1;
            }
        }

        sweep
    }
}
