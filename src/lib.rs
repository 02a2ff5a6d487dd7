//! # spendgraph - Vendor/Job Spend Graph Core
//!
//! spendgraph holds a graph of companies, jobs and vendors connected by
//! invoice and payment edges, and derives a filtered, styled view of it for
//! rendering. Duplicate vendors are folded together by merges that repoint
//! their transactions, either directly or through a reconciliation queue of
//! candidate matches.
//!
//! ## Core Concepts
//!
//! - **EntityStore**: authoritative nodes and edges; no edge ever dangles
//! - **FilterConfig**: kind visibility, rolling window, date/amount/status
//! - **SelectionModel**: ordered selection plus explicit highlight
//! - **ViewGraph**: pure derivation of what to draw
//! - **merge**: atomic node merge with audit trail
//! - **ReconciliationQueue**: reviewer decisions on candidate duplicates
//! - **GraphSession**: single-writer owner of all of the above
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{NaiveDate, TimeZone, Utc};
//! use spendgraph::{
//!     derive_view_graph, merge, Edge, EdgeId, EdgeKind, EntityStore, FilterConfig,
//!     InMemoryAuditLog, MergeRequest, Node, NodeId, NodeKind, SelectionModel,
//! };
//!
//! let (mut store, report) = EntityStore::from_dataset(
//!     vec![
//!         Node::new(NodeId::vendor(1), NodeKind::Vendor, "Acme"),
//!         Node::new(NodeId::vendor(2), NodeKind::Vendor, "ACME Inc"),
//!         Node::new(NodeId::job(1), NodeKind::Job, "Roof"),
//!     ],
//!     vec![Edge::new(EdgeId::new("e1")?, EdgeKind::Invoice, NodeId::vendor(2), NodeId::job(1))
//!         .with_amount(500.0)],
//! );
//! assert!(report.is_clean());
//!
//! let audit = InMemoryAuditLog::new();
//! let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
//! let request = MergeRequest::new(NodeId::vendor(1), NodeId::vendor(2)).reason("duplicate");
//! let outcome = merge(&mut store, &request, &audit, now)?;
//! assert_eq!(outcome.repointed_edges.len(), 1);
//!
//! let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let view = derive_view_graph(&store, &FilterConfig::default(), &SelectionModel::new(), today);
//! assert_eq!(view.nodes.len(), 2);
//! assert_eq!(view.edges[0].source, NodeId::vendor(1));
//! # Ok::<(), spendgraph::GraphError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod edge;
pub mod error;
pub mod node;
pub mod time;

// State
pub mod audit;
pub mod config;
pub mod filter;
pub mod selection;
pub mod store;

// Operations
pub mod merge;
pub mod reconcile;
pub mod view;

// Coordination
pub mod refresh;
pub mod session;
pub mod transport;

// Re-export primary types at crate root for convenience
pub use audit::{AuditAction, AuditSink, HistoryEntry, InMemoryAuditLog};
pub use config::{ActorConfig, RefreshConfig, SessionConfig, ViewConfig};
pub use edge::{Edge, EdgeAttributes, EdgeId, EdgeKind, EdgeStatus};
pub use error::{
    GraphError, GraphResult, MergeError, StoreError, TransportError, ValidationError, WorkflowError,
};
pub use filter::{AmountRange, FilterConfig, KindKey};
pub use merge::{
    merge, validate_merge, MergeOutcome, MergePreview, MergeProposal, MergeProposals, MergeRequest,
    ProposalRequest, ProposalStatus, SurvivorPolicy,
};
pub use node::{FlowStats, Node, NodeId, NodeKind};
pub use reconcile::{
    classify, ConfidenceTier, MatchClass, MatchScore, Outcome, ReconciliationQueue, ReconciliationTask,
    Resolution, ResolveAction, SourceRecord, TaskId, TaskStatus,
};
pub use refresh::RefreshScheduler;
pub use selection::{EntityRef, SelectionModel, SelectionState};
pub use session::{
    lock_session, Advisory, AdvisorySource, GraphSession, RefreshKind, RefreshOutcome, RefreshPayload,
    RefreshTicket, SharedSession,
};
pub use store::{DroppedRecord, EntityStore, LoadReport, StoreSnapshot};
pub use time::{Clock, DateRange, FixedClock, SystemClock};
pub use transport::{Dataset, EdgeQuery, GraphSource, InMemorySource, SourceCall};
pub use view::{derive_view_graph, derive_view_graph_with_threshold, ColorClass, ViewEdge, ViewGraph, ViewNode};
