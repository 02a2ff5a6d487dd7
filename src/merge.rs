//! Merge operator and two-step merge proposals.
//!
//! A merge folds a victim node into a survivor of the same kind: every edge
//! touching the victim is re-pointed, aggregates are combined, the victim is
//! deleted. It runs inside [`EntityStore::transaction`], so observers see
//! either the old graph or the merged one. Audit entries are emitted only
//! after the commit. There is no undo; reversing a merge is a new operation.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audit::{emit_all, AuditAction, AuditSink, HistoryEntry};
use crate::edge::EdgeId;
use crate::error::{GraphResult, MergeError};
use crate::node::{FlowStats, Node, NodeId};
use crate::store::EntityStore;

/// Actor recorded when the caller does not name one.
pub const DEFAULT_MERGE_ACTOR: &str = "user:default";

/// A request to fold `victim` into `survivor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Node that remains.
    pub survivor: NodeId,
    /// Node that is deleted.
    pub victim: NodeId,
    /// Who asked for it.
    pub actor: String,
    /// Free-form justification.
    pub reason: String,
}

impl MergeRequest {
    /// Creates a request with the default actor and an empty reason.
    #[must_use]
    pub fn new(survivor: NodeId, victim: NodeId) -> Self {
        Self {
            survivor,
            victim,
            actor: DEFAULT_MERGE_ACTOR.to_string(),
            reason: String::new(),
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

/// Result of a committed merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// The survivor after the merge.
    pub survivor: Node,
    /// The deleted node.
    pub victim: NodeId,
    /// Edges whose endpoints moved, in store order.
    pub repointed_edges: Vec<EdgeId>,
}

/// How to pick the survivor of a two-node merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurvivorPolicy {
    /// The first node of the pair survives.
    #[default]
    FirstSelected,
    /// The node with more incident edges survives; ties go to the first.
    MostTransactions,
    /// The lexically smaller id survives.
    LowestId,
}

impl SurvivorPolicy {
    /// Orders `(first, second)` into `(survivor, victim)`.
    ///
    /// # Errors
    ///
    /// `MostTransactions` returns `MergeError::MissingEntity` if either node
    /// is absent.
    pub fn choose(self, store: &EntityStore, first: NodeId, second: NodeId) -> GraphResult<(NodeId, NodeId)> {
        match self {
            Self::FirstSelected => Ok((first, second)),
            Self::LowestId => {
                if second < first {
                    Ok((second, first))
                } else {
                    Ok((first, second))
                }
            }
            Self::MostTransactions => {
                for id in [&first, &second] {
                    if !store.contains_node(id) {
                        return Err(MergeError::MissingEntity(id.clone()).into());
                    }
                }
                if store.edges_of(&second).len() > store.edges_of(&first).len() {
                    Ok((second, first))
                } else {
                    Ok((first, second))
                }
            }
        }
    }
}

/// Checks that `victim` can be folded into `survivor`.
///
/// # Errors
///
/// `SelfMerge`, then `MissingEntity` (survivor first), then `KindMismatch`.
pub fn validate_merge(store: &EntityStore, survivor: &NodeId, victim: &NodeId) -> Result<(), MergeError> {
    if survivor == victim {
        return Err(MergeError::SelfMerge(survivor.clone()));
    }
    let s = store
        .get_node(survivor)
        .map_err(|_| MergeError::MissingEntity(survivor.clone()))?;
    let v = store
        .get_node(victim)
        .map_err(|_| MergeError::MissingEntity(victim.clone()))?;
    if s.kind != v.kind {
        return Err(MergeError::KindMismatch {
            survivor: s.kind,
            victim: v.kind,
        });
    }
    Ok(())
}

/// Folds `request.victim` into `request.survivor`, atomically.
///
/// On success emits `VendorMerge` (filed under the survivor) and `WasMerged`
/// (filed under the victim). On error nothing changes.
///
/// # Errors
///
/// `GraphError::InvalidMerge` if [`validate_merge`] fails.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use spendgraph::{merge, EntityStore, InMemoryAuditLog, MergeRequest, Node, NodeId, NodeKind};
///
/// let mut store = EntityStore::new();
/// store.upsert_node(Node::new(NodeId::vendor(1), NodeKind::Vendor, "Acme"));
/// store.upsert_node(Node::new(NodeId::vendor(2), NodeKind::Vendor, "ACME Inc"));
///
/// let audit = InMemoryAuditLog::new();
/// let request = MergeRequest::new(NodeId::vendor(1), NodeId::vendor(2)).reason("duplicate");
/// merge(&mut store, &request, &audit, Utc::now()).unwrap();
///
/// assert!(!store.contains_node(&NodeId::vendor(2)));
/// ```
pub fn merge(
    store: &mut EntityStore,
    request: &MergeRequest,
    audit: &dyn AuditSink,
    now: DateTime<Utc>,
) -> GraphResult<MergeOutcome> {
    let outcome = store.transaction(|staged| apply_merge(staged, request))?;
    tracing::info!(
        survivor = %request.survivor,
        victim = %request.victim,
        edges = outcome.repointed_edges.len(),
        "merged nodes"
    );
    emit_all(audit, merge_entries(request, &outcome, now));
    Ok(outcome)
}

/// Applies a merge to `store` without audit. Callers wrap it in a transaction.
pub(crate) fn apply_merge(store: &mut EntityStore, request: &MergeRequest) -> GraphResult<MergeOutcome> {
    validate_merge(store, &request.survivor, &request.victim)?;

    let victim = store.get_node(&request.victim)?.clone();
    let repointed_edges = store.repoint_edges(&request.victim, &request.survivor)?;

    let mut survivor = store.get_node(&request.survivor)?.clone();
    survivor.stats = Some(survivor.stats_or_default().combine(&victim.stats_or_default()));
    fold_aliases(&mut survivor, &victim);
    store.upsert_node(survivor.clone());
    store.delete_node(&request.victim)?;

    Ok(MergeOutcome {
        survivor,
        victim: request.victim.clone(),
        repointed_edges,
    })
}

fn merge_entries(request: &MergeRequest, outcome: &MergeOutcome, now: DateTime<Utc>) -> Vec<HistoryEntry> {
    vec![
        HistoryEntry::new(AuditAction::VendorMerge, &request.actor, request.survivor.clone(), now).with_details(
            json!({
                "merged_node": request.victim,
                "reason": request.reason,
                "repointed_edges": outcome.repointed_edges.len(),
            }),
        ),
        HistoryEntry::new(AuditAction::WasMerged, &request.actor, request.victim.clone(), now).with_details(json!({
            "merged_into": request.survivor,
            "reason": request.reason,
        })),
    ]
}

// The victim's label and aliases become aliases of the survivor.
fn fold_aliases(survivor: &mut Node, victim: &Node) {
    let mut aliases: Vec<String> = survivor
        .attribute("aliases")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let before = aliases.len();

    let victim_names = std::iter::once(victim.label.as_str()).chain(
        victim
            .attribute("aliases")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str),
    );
    for name in victim_names {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(&survivor.label) {
            continue;
        }
        if aliases.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            continue;
        }
        aliases.push(name.to_string());
    }

    if aliases.len() != before {
        survivor.attributes.insert("aliases".to_string(), json!(aliases));
    }
}

/// Merge proposal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved and applied.
    Approved,
    /// Rejected; nothing was applied.
    Rejected,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// What approving a proposal would touch, computed when it was proposed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MergePreview {
    /// Distinct edges incident to any victim.
    pub affected_edges: usize,
    /// Sum of their amounts.
    pub total_transaction_value: f64,
}

impl MergePreview {
    /// Computes the preview for folding `victims` away.
    #[must_use]
    pub fn compute(store: &EntityStore, victims: &[NodeId]) -> Self {
        let mut seen: BTreeSet<&EdgeId> = BTreeSet::new();
        let mut total = 0.0;
        for victim in victims {
            for edge in store.edges_of(victim) {
                if seen.insert(&edge.id) {
                    total += edge.amount();
                }
            }
        }
        Self {
            affected_edges: seen.len(),
            total_transaction_value: total,
        }
    }
}

/// Input to [`MergeProposals::propose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRequest {
    /// Node that would remain.
    pub survivor: NodeId,
    /// Nodes that would be folded in.
    pub victims: Vec<NodeId>,
    /// Who proposed it.
    pub proposed_by: String,
    /// Free-form justification.
    pub reason: String,
}

/// A proposed multi-node merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeProposal {
    /// Proposal id.
    pub id: u64,
    /// Node that would remain.
    pub survivor: NodeId,
    /// Nodes that would be folded in, deduplicated.
    pub victims: Vec<NodeId>,
    /// Who proposed it.
    pub proposed_by: String,
    /// Justification.
    pub reason: String,
    /// Lifecycle state.
    pub status: ProposalStatus,
    /// Consequences at proposal time.
    pub preview: MergePreview,
    /// When it was proposed.
    pub created_at: DateTime<Utc>,
    /// Who approved or rejected it.
    pub decided_by: Option<String>,
    /// When it was approved or rejected.
    pub decided_at: Option<DateTime<Utc>>,
    /// Approval notes or rejection reason.
    pub decision_note: Option<String>,
}

/// Registry of merge proposals.
#[derive(Debug, Clone, Default)]
pub struct MergeProposals {
    proposals: BTreeMap<u64, MergeProposal>,
    next_id: u64,
}

impl MergeProposals {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a proposal after validating every survivor/victim pair.
    ///
    /// # Errors
    ///
    /// - `MergeError::NoVictims` if `victims` is empty
    /// - any [`validate_merge`] error
    pub fn propose(
        &mut self,
        store: &EntityStore,
        request: ProposalRequest,
        audit: &dyn AuditSink,
        now: DateTime<Utc>,
    ) -> GraphResult<u64> {
        let mut victims: Vec<NodeId> = Vec::new();
        for victim in request.victims {
            if !victims.contains(&victim) {
                victims.push(victim);
            }
        }
        if victims.is_empty() {
            return Err(MergeError::NoVictims.into());
        }
        for victim in &victims {
            validate_merge(store, &request.survivor, victim)?;
        }

        self.next_id += 1;
        let id = self.next_id;
        let proposal = MergeProposal {
            id,
            preview: MergePreview::compute(store, &victims),
            survivor: request.survivor,
            victims,
            proposed_by: request.proposed_by,
            reason: request.reason,
            status: ProposalStatus::Pending,
            created_at: now,
            decided_by: None,
            decided_at: None,
            decision_note: None,
        };

        let entry = HistoryEntry::new(
            AuditAction::MergeProposed,
            &proposal.proposed_by,
            proposal.survivor.clone(),
            now,
        )
        .with_details(json!({
            "proposal_id": id,
            "victims": proposal.victims,
            "reason": proposal.reason,
            "affected_edges": proposal.preview.affected_edges,
            "total_transaction_value": proposal.preview.total_transaction_value,
        }));
        self.proposals.insert(id, proposal);
        emit_all(audit, vec![entry]);
        Ok(id)
    }

    /// Applies every victim merge of a pending proposal in one transaction.
    ///
    /// # Errors
    ///
    /// - `MergeError::ProposalNotFound` / `ProposalNotPending`
    /// - any merge error; the store and the proposal are then unchanged
    pub fn approve(
        &mut self,
        id: u64,
        store: &mut EntityStore,
        approved_by: &str,
        notes: Option<String>,
        audit: &dyn AuditSink,
        now: DateTime<Utc>,
    ) -> GraphResult<Vec<MergeOutcome>> {
        let proposal = self.pending_mut(id)?;
        let requests: Vec<MergeRequest> = proposal
            .victims
            .iter()
            .map(|victim| {
                MergeRequest::new(proposal.survivor.clone(), victim.clone())
                    .actor(approved_by)
                    .reason(proposal.reason.clone())
            })
            .collect();

        let outcomes = store.transaction(|staged| {
            requests
                .iter()
                .map(|request| apply_merge(staged, request))
                .collect::<GraphResult<Vec<_>>>()
        })?;

        proposal.status = ProposalStatus::Approved;
        proposal.decided_by = Some(approved_by.to_string());
        proposal.decided_at = Some(now);
        proposal.decision_note = notes;

        let mut entries: Vec<HistoryEntry> = requests
            .iter()
            .zip(&outcomes)
            .flat_map(|(request, outcome)| merge_entries(request, outcome, now))
            .collect();
        entries.push(
            HistoryEntry::new(AuditAction::MergeApproved, approved_by, proposal.survivor.clone(), now)
                .with_details(json!({
                    "proposal_id": id,
                    "victims": proposal.victims,
                    "notes": proposal.decision_note,
                })),
        );
        tracing::info!(proposal = id, merged = outcomes.len(), "merge proposal approved");
        emit_all(audit, entries);
        Ok(outcomes)
    }

    /// Rejects a pending proposal. Nothing is merged.
    ///
    /// # Errors
    ///
    /// `MergeError::ProposalNotFound` / `ProposalNotPending`.
    pub fn reject(
        &mut self,
        id: u64,
        rejected_by: &str,
        reason: impl Into<String>,
        audit: &dyn AuditSink,
        now: DateTime<Utc>,
    ) -> GraphResult<()> {
        let proposal = self.pending_mut(id)?;
        proposal.status = ProposalStatus::Rejected;
        proposal.decided_by = Some(rejected_by.to_string());
        proposal.decided_at = Some(now);
        proposal.decision_note = Some(reason.into());

        let entry = HistoryEntry::new(AuditAction::MergeRejected, rejected_by, proposal.survivor.clone(), now)
            .with_details(json!({
                "proposal_id": id,
                "reason": proposal.decision_note,
            }));
        emit_all(audit, vec![entry]);
        Ok(())
    }

    /// Looks up a proposal.
    ///
    /// # Errors
    ///
    /// `MergeError::ProposalNotFound` if unknown.
    pub fn get(&self, id: u64) -> Result<&MergeProposal, MergeError> {
        self.proposals.get(&id).ok_or(MergeError::ProposalNotFound(id))
    }

    /// Pending proposals, newest first.
    #[must_use]
    pub fn pending(&self) -> Vec<&MergeProposal> {
        let mut out: Vec<&MergeProposal> = self
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        out
    }

    fn pending_mut(&mut self, id: u64) -> Result<&mut MergeProposal, MergeError> {
        let proposal = self.proposals.get_mut(&id).ok_or(MergeError::ProposalNotFound(id))?;
        if proposal.status != ProposalStatus::Pending {
            return Err(MergeError::ProposalNotPending {
                id,
                status: proposal.status.to_string(),
            });
        }
        Ok(proposal)
    }
}

/// Stats the survivor would end up with, without touching the store.
#[must_use]
pub fn combined_stats<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> FlowStats {
    nodes
        .into_iter()
        .fold(FlowStats::default(), |acc, node| acc.combine(&node.stats_or_default()))
}
