//! Error types for spendgraph.
//!
//! Every failure is a typed `thiserror` enum scoped to one concern. The
//! top-level [`GraphError`] wraps them so callers can either match on the
//! specific condition or just propagate with `?`.
//!
//! Nothing in this crate is fatal: the worst outcome of any error is a stale or
//! incomplete view. Merge and resolve errors are raised before any state is
//! touched.

use thiserror::Error;

use crate::edge::EdgeId;
use crate::node::{NodeId, NodeKind};
use crate::reconcile::TaskId;

/// Validation errors raised while constructing or checking input values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    EmptyId {
        field: &'static str,
    },

    #[error("Amount {value} must be a finite, non-negative number")]
    InvalidAmount {
        value: f64,
    },

    #[error("Rolling window of {months} months is out of range [1, 12]")]
    WindowOutOfRange {
        months: u32,
    },

    #[error("Invalid date range: from ({from}) must not be after to ({to})")]
    InvalidDateRange {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    },

    #[error("Invalid amount range: min ({min}) must not exceed max ({max})")]
    InvalidAmountRange {
        min: f64,
        max: f64,
    },

    #[error("Match score {value} is out of range [0, 100]")]
    ScoreOutOfRange {
        value: f64,
    },

    #[error("Unknown {what}: {value}")]
    UnknownKind {
        what: &'static str,
        value: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised by the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Edge not found: {0}")]
    EdgeNotFound(EdgeId),

    /// Deleting the node would orphan the listed edges.
    #[error("Node {node} is still referenced by {} edge(s)", .edges.len())]
    ReferentialIntegrity {
        node: NodeId,
        edges: Vec<EdgeId>,
    },

    /// The edge names an endpoint that is not in the store.
    #[error("Edge {edge} references missing node {missing}")]
    DanglingEdge {
        edge: EdgeId,
        missing: NodeId,
    },
}

/// Reasons a merge request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("Cannot merge node {0} into itself")]
    SelfMerge(NodeId),

    #[error("Cannot merge: node {0} does not exist")]
    MissingEntity(NodeId),

    #[error("Cannot merge a {victim} into a {survivor}")]
    KindMismatch {
        survivor: NodeKind,
        victim: NodeKind,
    },

    #[error("Merge proposal names no victims")]
    NoVictims,

    #[error("Merge needs exactly two selected nodes (selection has {selected} entities)")]
    InvalidSelection {
        selected: usize,
    },

    #[error("Merge proposal not found: {0}")]
    ProposalNotFound(u64),

    #[error("Merge proposal {id} is not pending (status: {status})")]
    ProposalNotPending {
        id: u64,
        status: String,
    },
}

/// Errors raised by the reconciliation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Reconciliation task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Reconciliation task {0} is already resolved")]
    TaskAlreadyResolved(TaskId),
}

/// Errors from the transport collaborator or from response sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("Failed to decode response: {message}")]
    Deserialization {
        message: String,
    },

    #[error("Server error (code {code}): {message}")]
    Server {
        code: u32,
        message: String,
    },

    /// A newer request started before this response arrived.
    #[error("Stale response for request {ticket} (latest is {latest})")]
    StaleResponse {
        ticket: u64,
        latest: u64,
    },
}

/// Top-level error type for spendgraph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid merge: {0}")]
    InvalidMerge(#[from] MergeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl GraphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error names an unknown node, edge, task or proposal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::NodeNotFound(_) | StoreError::EdgeNotFound(_))
                | Self::Workflow(WorkflowError::TaskNotFound(_))
                | Self::InvalidMerge(MergeError::ProposalNotFound(_))
        )
    }

    /// Returns true if this is a superseded response that callers should drop.
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Transport(TransportError::StaleResponse { .. }))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. } => true,
                TransportError::Server { code, .. } => *code >= 500,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Result type alias for spendgraph operations.
pub type GraphResult<T> = Result<T, GraphError>;
