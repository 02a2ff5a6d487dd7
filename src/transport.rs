//! Transport collaborator interface.
//!
//! The core never talks to the network itself. A [`GraphSource`] supplies raw
//! records and accepts decisions; the session and the refresh scheduler only
//! see this trait. [`InMemorySource`] is the reference implementation for
//! embedded use and tests.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::audit::HistoryEntry;
use crate::edge::Edge;
use crate::error::TransportError;
use crate::filter::AmountRange;
use crate::node::{Node, NodeId};
use crate::reconcile::{ReconciliationTask, ResolveAction, TaskId};
use crate::time::DateRange;

fn lock_err(context: &'static str) -> TransportError {
    TransportError::ConnectionFailed {
        message: format!("poisoned lock: {context}"),
    }
}

/// Server-side edge filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeQuery {
    /// Date bounds.
    #[serde(default)]
    pub date_range: DateRange,
    /// Amount bounds.
    #[serde(default)]
    pub amount_range: AmountRange,
}

impl EdgeQuery {
    /// Returns true if `edge` satisfies the query. Dateless edges pass the
    /// date bounds.
    #[must_use]
    pub fn matches(&self, edge: &Edge) -> bool {
        let date_ok = edge.date().map_or(true, |d| self.date_range.contains(d));
        date_ok && self.amount_range.contains(edge.amount())
    }
}

/// A full dataset as delivered by a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// All nodes.
    pub nodes: Vec<Node>,
    /// All edges.
    pub edges: Vec<Edge>,
}

/// Supplier of graph records and receiver of decisions.
///
/// Calls block until the transport answers or fails.
pub trait GraphSource: Send + Sync {
    /// Every node.
    fn fetch_nodes(&self) -> Result<Vec<Node>, TransportError>;

    /// Edges matching `query`.
    fn fetch_edges(&self, query: &EdgeQuery) -> Result<Vec<Edge>, TransportError>;

    /// The upstream reconciliation queue.
    fn fetch_reconciliation_queue(&self) -> Result<Vec<ReconciliationTask>, TransportError>;

    /// Reports a reviewer decision upstream.
    fn resolve_task(&self, task_id: TaskId, action: ResolveAction) -> Result<(), TransportError>;

    /// Reports a manual merge upstream.
    fn manual_merge(&self, survivor: &NodeId, victim: &NodeId, reason: &str) -> Result<(), TransportError>;

    /// Audit history of a node, newest first.
    fn fetch_node_history(&self, node: &NodeId) -> Result<Vec<HistoryEntry>, TransportError>;

    /// Nodes plus matching edges.
    fn fetch_dataset(&self, query: &EdgeQuery) -> Result<Dataset, TransportError> {
        Ok(Dataset {
            nodes: self.fetch_nodes()?,
            edges: self.fetch_edges(query)?,
        })
    }
}

/// Calls recorded by [`InMemorySource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum SourceCall {
    /// `resolve_task`
    ResolveTask {
        /// Task.
        task_id: TaskId,
        /// Decision.
        action: ResolveAction,
    },
    /// `manual_merge`
    ManualMerge {
        /// Survivor.
        survivor: NodeId,
        /// Victim.
        victim: NodeId,
        /// Reason.
        reason: String,
    },
}

#[derive(Debug, Default)]
struct SourceState {
    dataset: Dataset,
    tasks: Vec<ReconciliationTask>,
    history: Vec<HistoryEntry>,
    failure: Option<TransportError>,
    calls: Vec<SourceCall>,
}

/// In-memory [`GraphSource`] with failure injection.
#[derive(Debug, Default)]
pub struct InMemorySource {
    state: RwLock<SourceState>,
}

impl InMemorySource {
    /// Create a source serving `dataset`.
    #[must_use]
    pub fn new(dataset: Dataset) -> Self {
        Self {
            state: RwLock::new(SourceState {
                dataset,
                ..SourceState::default()
            }),
        }
    }

    /// Replaces the served dataset.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the lock is poisoned.
    pub fn set_dataset(&self, dataset: Dataset) -> Result<(), TransportError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.set_dataset"))?;
        state.dataset = dataset;
        Ok(())
    }

    /// Replaces the served reconciliation queue.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the lock is poisoned.
    pub fn set_tasks(&self, tasks: Vec<ReconciliationTask>) -> Result<(), TransportError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.set_tasks"))?;
        state.tasks = tasks;
        Ok(())
    }

    /// Replaces the served history.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the lock is poisoned.
    pub fn set_history(&self, history: Vec<HistoryEntry>) -> Result<(), TransportError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.set_history"))?;
        state.history = history;
        Ok(())
    }

    /// Makes every call fail with `failure` until cleared with `None`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the lock is poisoned.
    pub fn set_failure(&self, failure: Option<TransportError>) -> Result<(), TransportError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.set_failure"))?;
        state.failure = failure;
        Ok(())
    }

    /// Decisions reported so far.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the lock is poisoned.
    pub fn calls(&self) -> Result<Vec<SourceCall>, TransportError> {
        let state = self.state.read().map_err(|_| lock_err("source.calls"))?;
        Ok(state.calls.clone())
    }

    fn check(state: &SourceState) -> Result<(), TransportError> {
        match &state.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl GraphSource for InMemorySource {
    fn fetch_nodes(&self) -> Result<Vec<Node>, TransportError> {
        let state = self.state.read().map_err(|_| lock_err("source.fetch_nodes"))?;
        Self::check(&state)?;
        Ok(state.dataset.nodes.clone())
    }

    fn fetch_edges(&self, query: &EdgeQuery) -> Result<Vec<Edge>, TransportError> {
        let state = self.state.read().map_err(|_| lock_err("source.fetch_edges"))?;
        Self::check(&state)?;
        Ok(state
            .dataset
            .edges
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    fn fetch_reconciliation_queue(&self) -> Result<Vec<ReconciliationTask>, TransportError> {
        let state = self.state.read().map_err(|_| lock_err("source.fetch_reconciliation_queue"))?;
        Self::check(&state)?;
        Ok(state.tasks.clone())
    }

    fn resolve_task(&self, task_id: TaskId, action: ResolveAction) -> Result<(), TransportError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.resolve_task"))?;
        Self::check(&state)?;
        state.calls.push(SourceCall::ResolveTask { task_id, action });
        Ok(())
    }

    fn manual_merge(&self, survivor: &NodeId, victim: &NodeId, reason: &str) -> Result<(), TransportError> {
        let mut state = self.state.write().map_err(|_| lock_err("source.manual_merge"))?;
        Self::check(&state)?;
        state.calls.push(SourceCall::ManualMerge {
            survivor: survivor.clone(),
            victim: victim.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn fetch_node_history(&self, node: &NodeId) -> Result<Vec<HistoryEntry>, TransportError> {
        let state = self.state.read().map_err(|_| lock_err("source.fetch_node_history"))?;
        Self::check(&state)?;
        let mut out: Vec<HistoryEntry> = state.history.iter().filter(|e| &e.target == node).cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }
}
