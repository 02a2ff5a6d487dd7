//! Background refresh scheduler.
//!
//! One named thread re-fetches the dataset and the reconciliation queue on
//! their configured cadences. Fetches run without holding the session lock;
//! the lock is taken only to hand out a ticket and to apply the result, so a
//! slow transport never blocks readers. Results from a fetch that was
//! overtaken by a newer one of the same kind are dropped by the session.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender, TrySendError};

use crate::config::RefreshConfig;
use crate::error::{GraphError, GraphResult};
use crate::session::{fetch, lock_session, RefreshKind, RefreshOutcome, SharedSession};
use crate::transport::GraphSource;

const COMMAND_CAPACITY: usize = 16;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

enum Command {
    Refresh {
        kind: RefreshKind,
        reply: Option<Sender<GraphResult<RefreshOutcome>>>,
    },
}

/// Handle to the refresh thread. Dropping it stops the thread.
pub struct RefreshScheduler {
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// Starts the refresh thread. Both kinds are fetched once immediately.
    ///
    /// # Errors
    ///
    /// `GraphError::Internal` if the thread cannot be spawned.
    pub fn spawn(session: SharedSession, source: Arc<dyn GraphSource>, config: RefreshConfig) -> GraphResult<Self> {
        let (tx, rx) = bounded::<Command>(COMMAND_CAPACITY);
        let dataset_ticks = tick(config.dataset_interval().max(MIN_INTERVAL));
        let queue_ticks = tick(config.queue_interval().max(MIN_INTERVAL));

        let worker = thread::Builder::new()
            .name("spendgraph-refresh".to_string())
            .spawn(move || {
                log_outcome(RefreshKind::Dataset, run_refresh(&session, source.as_ref(), RefreshKind::Dataset));
                log_outcome(RefreshKind::Queue, run_refresh(&session, source.as_ref(), RefreshKind::Queue));
                loop {
                    select! {
                        recv(rx) -> msg => match msg {
                            Ok(Command::Refresh { kind, reply }) => {
                                let result = run_refresh(&session, source.as_ref(), kind);
                                match reply {
                                    Some(reply) => {
                                        let _ = reply.send(result);
                                    }
                                    None => log_outcome(kind, result),
                                }
                            }
                            Err(_) => break,
                        },
                        recv(dataset_ticks) -> _ => {
                            log_outcome(RefreshKind::Dataset, run_refresh(&session, source.as_ref(), RefreshKind::Dataset));
                        }
                        recv(queue_ticks) -> _ => {
                            log_outcome(RefreshKind::Queue, run_refresh(&session, source.as_ref(), RefreshKind::Queue));
                        }
                    }
                }
                tracing::debug!("refresh scheduler stopped");
            })
            .map_err(|e| GraphError::internal(format!("failed to spawn refresh thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Requests an out-of-cadence refresh. A full command queue means
    /// refreshes are already pending, so the request is coalesced.
    ///
    /// # Errors
    ///
    /// `GraphError::Internal` if the scheduler has stopped.
    pub fn trigger(&self, kind: RefreshKind) -> GraphResult<()> {
        let tx = self.sender()?;
        match tx.try_send(Command::Refresh { kind, reply: None }) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(stopped()),
        }
    }

    /// Requests a refresh and waits until it has been applied.
    ///
    /// # Errors
    ///
    /// - `GraphError::Internal` if the scheduler has stopped
    /// - any error from applying the result
    pub fn refresh_and_wait(&self, kind: RefreshKind) -> GraphResult<RefreshOutcome> {
        let (reply, rx) = bounded(1);
        self.sender()?
            .send(Command::Refresh {
                kind,
                reply: Some(reply),
            })
            .map_err(|_| stopped())?;
        rx.recv().map_err(|_| stopped())?
    }

    /// Stops the thread and waits for it. An in-flight fetch completes first.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn sender(&self) -> GraphResult<&Sender<Command>> {
        self.tx.as_ref().ok_or_else(stopped)
    }

    fn stop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stopped() -> GraphError {
    GraphError::internal("refresh scheduler stopped")
}

fn run_refresh(session: &SharedSession, source: &dyn GraphSource, kind: RefreshKind) -> GraphResult<RefreshOutcome> {
    let (ticket, query) = {
        let mut guard = lock_session(session)?;
        (guard.begin_refresh(kind), guard.edge_query())
    };
    let result = fetch(source, kind, &query);
    let mut guard = lock_session(session)?;
    guard.apply_refresh(ticket, result)
}

fn log_outcome(kind: RefreshKind, result: GraphResult<RefreshOutcome>) {
    match result {
        Ok(RefreshOutcome::Loaded(report)) => {
            tracing::debug!(%kind, nodes = report.nodes, edges = report.edges, dropped = report.dropped.len(), "refresh applied");
        }
        Ok(RefreshOutcome::QueueSynced(pending)) => tracing::debug!(%kind, pending, "refresh applied"),
        Ok(RefreshOutcome::Stale | RefreshOutcome::Failed(_)) => {}
        Err(e) => tracing::warn!(%kind, "refresh error: {e}"),
    }
}
