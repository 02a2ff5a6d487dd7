//! Reconciliation workflow.
//!
//! Upstream matching raises tasks that pair an incoming vendor record with an
//! existing vendor it may duplicate. A reviewer resolves each task exactly
//! once, either folding the record into the candidate (`Merge`) or creating a
//! new vendor for it (`CreateNew`).
//!
//! Resolution is at-most-once: the store mutation runs in a transaction and
//! the task only flips to `Resolved` after it commits, so a failed resolve can
//! be retried and a successful one cannot be replayed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{emit_all, AuditAction, AuditSink, HistoryEntry};
use crate::edge::{Edge, EdgeId, EdgeKind};
use crate::error::{GraphResult, ValidationError, WorkflowError};
use crate::merge::{apply_merge, MergeRequest};
use crate::node::{FlowStats, Node, NodeId, NodeKind};
use crate::store::EntityStore;

/// Score at or above which a match is shown as high confidence.
pub const HIGH_CONFIDENCE: f64 = 90.0;
/// Score at or above which a match is shown as medium confidence.
pub const MEDIUM_CONFIDENCE: f64 = 75.0;
/// Score at or above which upstream matching links records automatically.
pub const AUTO_MATCH_THRESHOLD: f64 = 95.0;
/// Score at or above which upstream matching raises a review task.
pub const CANDIDATE_THRESHOLD: f64 = 75.0;

/// Reconciliation task identifier. Monotonic within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a task was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The record was folded into the candidate.
    Merged,
    /// The record became a new vendor.
    CreatedNew,
}

/// Task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Awaiting review.
    Pending,
    /// Resolved; never reopened.
    Resolved(Outcome),
}

impl TaskStatus {
    /// Returns true if the task awaits review.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Reviewer decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    /// Fold the record into the candidate vendor.
    Merge,
    /// Create a new vendor for the record.
    CreateNew,
}

/// Incoming vendor record under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Vendor name as written on the record.
    pub vendor_name: String,
    /// Invoice amount.
    #[serde(default)]
    pub amount: f64,
    /// Upstream invoice id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    /// System the record came from.
    #[serde(default)]
    pub origin: String,
    /// Job the invoice is billed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Invoice date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    /// Currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl SourceRecord {
    /// Creates a record with only a name, amount and origin.
    #[must_use]
    pub fn new(vendor_name: impl Into<String>, amount: f64, origin: impl Into<String>) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            amount,
            invoice_id: None,
            origin: origin.into(),
            job_id: None,
            date: None,
            currency: None,
        }
    }

    /// Sets the invoice id.
    #[must_use]
    pub fn invoice_id(mut self, id: impl Into<String>) -> Self {
        self.invoice_id = Some(id.into());
        self
    }

    /// Sets the job.
    #[must_use]
    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    /// Sets the date.
    #[must_use]
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the currency.
    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    /// Checks the amount is finite and non-negative.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidAmount` otherwise.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(ValidationError::InvalidAmount { value: self.amount });
        }
        Ok(())
    }
}

/// Display tier of a match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Below 75.
    Low,
    /// 75 to below 90.
    Medium,
    /// 90 and above.
    High,
}

/// What upstream matching does with a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchClass {
    /// Linked without review.
    AutoMatch,
    /// Raised as a review task.
    Candidate,
    /// Treated as a new vendor.
    New,
}

/// Match confidence in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MatchScore(f64);

impl MatchScore {
    /// Creates a score.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ScoreOutOfRange` outside `[0, 100]` or for NaN.
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if (0.0..=100.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ValidationError::ScoreOutOfRange { value })
        }
    }

    /// The raw score.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Display tier. Tiers never drive resolution.
    #[must_use]
    pub fn tier(self) -> ConfidenceTier {
        if self.0 >= HIGH_CONFIDENCE {
            ConfidenceTier::High
        } else if self.0 >= MEDIUM_CONFIDENCE {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

impl TryFrom<f64> for MatchScore {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MatchScore> for f64 {
    fn from(score: MatchScore) -> Self {
        score.0
    }
}

/// Upstream classification of a score.
#[must_use]
pub fn classify(score: MatchScore) -> MatchClass {
    if score.value() >= AUTO_MATCH_THRESHOLD {
        MatchClass::AutoMatch
    } else if score.value() >= CANDIDATE_THRESHOLD {
        MatchClass::Candidate
    } else {
        MatchClass::New
    }
}

/// A candidate-duplicate decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationTask {
    /// Task id.
    pub task_id: TaskId,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// The incoming record.
    pub source_record: SourceRecord,
    /// Existing vendor the record may duplicate.
    #[serde(alias = "candidate_node_id")]
    pub candidate: NodeId,
    /// Match confidence.
    #[serde(alias = "match_score")]
    pub score: MatchScore,
    /// When the task was raised.
    pub created_at: DateTime<Utc>,
}

/// Result of a successful resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The task.
    pub task_id: TaskId,
    /// How it was resolved.
    pub outcome: Outcome,
    /// The node now carrying the record: the candidate, or the new vendor.
    pub node: NodeId,
    /// The invoice edge created for the record, if its job exists.
    pub edge: Option<EdgeId>,
}

/// Queue of reconciliation tasks.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationQueue {
    tasks: BTreeMap<TaskId, ReconciliationTask>,
    resolved_here: BTreeSet<TaskId>,
    next_id: u64,
}

impl ReconciliationQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the queue with the upstream view.
    ///
    /// Tasks resolved through this queue keep their local state even if
    /// upstream still reports them pending. Returns the pending count.
    pub fn sync(&mut self, tasks: Vec<ReconciliationTask>) -> usize {
        let mut next: BTreeMap<TaskId, ReconciliationTask> = BTreeMap::new();
        for task in tasks {
            self.bump_next_id(task.task_id);
            if self.resolved_here.contains(&task.task_id) {
                continue;
            }
            next.insert(task.task_id, task);
        }
        for id in &self.resolved_here {
            if let Some(task) = self.tasks.get(id) {
                next.insert(*id, task.clone());
            }
        }
        self.tasks = next;

        let pending = self.tasks.values().filter(|t| t.status.is_pending()).count();
        tracing::debug!(pending, total = self.tasks.len(), "reconciliation queue synced");
        pending
    }

    /// Raises a new pending task.
    pub fn enqueue(
        &mut self,
        source_record: SourceRecord,
        candidate: NodeId,
        score: MatchScore,
        created_at: DateTime<Utc>,
    ) -> TaskId {
        let task_id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.insert(
            task_id,
            ReconciliationTask {
                task_id,
                status: TaskStatus::Pending,
                source_record,
                candidate,
                score,
                created_at,
            },
        );
        task_id
    }

    /// Pending tasks, oldest first; ties by id.
    #[must_use]
    pub fn list_pending(&self) -> Vec<&ReconciliationTask> {
        let mut out: Vec<&ReconciliationTask> = self.tasks.values().filter(|t| t.status.is_pending()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.task_id.cmp(&b.task_id)));
        out
    }

    /// Number of pending tasks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.is_pending()).count()
    }

    /// Looks up a task.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::TaskNotFound` if unknown.
    pub fn get(&self, task_id: TaskId) -> Result<&ReconciliationTask, WorkflowError> {
        self.tasks.get(&task_id).ok_or(WorkflowError::TaskNotFound(task_id))
    }

    /// Applies a reviewer decision.
    ///
    /// # Errors
    ///
    /// - `WorkflowError::TaskNotFound` / `TaskAlreadyResolved`
    /// - `GraphError::InvalidMerge` if `Merge` names a missing or non-vendor
    ///   candidate
    ///
    /// On error the store, the task and the audit log are unchanged.
    pub fn resolve(
        &mut self,
        task_id: TaskId,
        action: ResolveAction,
        store: &mut EntityStore,
        audit: &dyn AuditSink,
        actor: &str,
        now: DateTime<Utc>,
    ) -> GraphResult<Resolution> {
        let task = self.get(task_id)?;
        if !task.status.is_pending() {
            return Err(WorkflowError::TaskAlreadyResolved(task_id).into());
        }
        task.source_record.validate()?;

        let vendor_id = fresh_vendor_id(store, random_suffix);
        let vendor = synthesize_vendor(vendor_id, &task.source_record);
        let vendor_id = vendor.id.clone();
        let edge = invoice_edge(store, &task.source_record, &vendor_id);
        let edge_id = edge.as_ref().map(|e| e.id.clone());

        let (resolution, entry) = match action {
            ResolveAction::Merge => {
                let request = MergeRequest::new(task.candidate.clone(), vendor_id)
                    .actor(actor)
                    .reason(format!("reconciliation task {task_id}"));
                store.transaction(|staged| {
                    staged.upsert_node(vendor);
                    if let Some(edge) = edge {
                        staged.upsert_edge(edge)?;
                    }
                    apply_merge(staged, &request)
                })?;
                let entry = HistoryEntry::new(AuditAction::ReconciliationMerge, actor, task.candidate.clone(), now)
                    .with_details(json!({
                        "task_id": task_id.get(),
                        "source_record": task.source_record,
                        "match_score": task.score.value(),
                    }));
                let resolution = Resolution {
                    task_id,
                    outcome: Outcome::Merged,
                    node: task.candidate.clone(),
                    edge: edge_id,
                };
                (resolution, entry)
            }
            ResolveAction::CreateNew => {
                store.transaction(|staged| {
                    staged.upsert_node(vendor);
                    if let Some(edge) = edge {
                        staged.upsert_edge(edge)?;
                    }
                    Ok(())
                })?;
                let entry = HistoryEntry::new(AuditAction::NodeCreated, actor, vendor_id.clone(), now)
                    .with_details(json!({
                        "task_id": task_id.get(),
                        "source_record": task.source_record,
                        "rejected_candidate": task.candidate,
                    }));
                let resolution = Resolution {
                    task_id,
                    outcome: Outcome::CreatedNew,
                    node: vendor_id,
                    edge: edge_id,
                };
                (resolution, entry)
            }
        };

        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Resolved(resolution.outcome);
        }
        self.resolved_here.insert(task_id);
        tracing::info!(task = %task_id, outcome = ?resolution.outcome, node = %resolution.node, "reconciliation task resolved");
        emit_all(audit, vec![entry]);
        Ok(resolution)
    }

    fn bump_next_id(&mut self, seen: TaskId) {
        self.next_id = self.next_id.max(seen.get().saturating_add(1));
    }
}

/// New vendor node for a record: `node:vendor:<8 hex>`, active, its name as
/// the only alias. The record counts as one outgoing transaction.
fn random_suffix() -> String {
    let mut short = Uuid::new_v4().simple().to_string();
    short.truncate(8);
    short
}

// Draws suffixes until one names no existing node.
fn fresh_vendor_id(store: &EntityStore, mut suffix: impl FnMut() -> String) -> NodeId {
    loop {
        let id = NodeId::vendor(suffix());
        if !store.contains_node(&id) {
            return id;
        }
    }
}

fn synthesize_vendor(id: NodeId, record: &SourceRecord) -> Node {
    Node::new(id, NodeKind::Vendor, record.vendor_name.clone())
        .with_attribute("name", record.vendor_name.clone())
        .with_attribute("aliases", json!([record.vendor_name]))
        .with_attribute("status", "active")
        .with_stats(FlowStats::new(0.0, record.amount, 1))
}

/// Invoice edge from the new vendor to the record's job, if that job is loaded.
fn invoice_edge(store: &EntityStore, record: &SourceRecord, vendor: &NodeId) -> Option<Edge> {
    let job_id = record.job_id.as_deref()?;
    let job = NodeId::job(job_id);
    if !store.contains_node(&job) {
        tracing::warn!("record for {} names unknown job {job}; no invoice edge created", record.vendor_name);
        return None;
    }

    let mut edge = Edge::new(EdgeId::generate(), EdgeKind::Invoice, vendor.clone(), job)
        .with_amount(record.amount)
        .with_extra("source", record.origin.clone());
    if let Some(date) = record.date {
        edge = edge.with_date(date);
    }
    if let Some(currency) = &record.currency {
        edge = edge.with_extra("currency", currency.clone());
    }
    if let Some(invoice_id) = &record.invoice_id {
        edge = edge.with_extra("source_id", invoice_id.clone());
    }
    Some(edge)
}
