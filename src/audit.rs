//! Audit history.
//!
//! The core only emits history entries; where they are kept is up to the
//! sink. [`InMemoryAuditLog`] is the reference sink for embedded use and tests.

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GraphError, GraphResult};
use crate::node::NodeId;

fn lock_err(context: &'static str) -> GraphError {
    GraphError::internal(format!("poisoned lock: {context}"))
}

/// What happened to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A node was created by a reconciliation decision.
    NodeCreated,
    /// Another node was folded into this one.
    VendorMerge,
    /// This node was folded into another and deleted.
    WasMerged,
    /// A reconciliation task was resolved by merging into this node.
    ReconciliationMerge,
    /// A merge with this node as survivor was proposed.
    MergeProposed,
    /// A proposed merge was approved.
    MergeApproved,
    /// A proposed merge was rejected.
    MergeRejected,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeCreated => "NODE_CREATED",
            Self::VendorMerge => "VENDOR_MERGE",
            Self::WasMerged => "WAS_MERGED",
            Self::ReconciliationMerge => "RECONCILIATION_MERGE",
            Self::MergeProposed => "MERGE_PROPOSED",
            Self::MergeApproved => "MERGE_APPROVED",
            Self::MergeRejected => "MERGE_REJECTED",
        };
        f.write_str(s)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// What happened.
    pub action: AuditAction,
    /// Who did it (`user:default`, `user:reconciler`, ...).
    pub actor: String,
    /// The node the entry is filed under.
    pub target: NodeId,
    /// Action-specific payload.
    #[serde(default)]
    pub details: Value,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Creates an entry with empty details.
    #[must_use]
    pub fn new(action: AuditAction, actor: impl Into<String>, target: NodeId, timestamp: DateTime<Utc>) -> Self {
        Self {
            action,
            actor: actor.into(),
            target,
            details: Value::Object(serde_json::Map::new()),
            timestamp,
        }
    }

    /// Sets the details payload.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    /// Appends an entry.
    fn record(&self, entry: HistoryEntry) -> GraphResult<()>;

    /// Entries filed under `node`, newest first.
    fn history_for(&self, node: &NodeId) -> GraphResult<Vec<HistoryEntry>>;
}

/// Records entries that could not be delivered. Audit failures never undo
/// a committed change.
pub(crate) fn emit_all(sink: &dyn AuditSink, entries: Vec<HistoryEntry>) {
    for entry in entries {
        let action = entry.action;
        if let Err(e) = sink.record(entry) {
            tracing::warn!("failed to record {action} audit entry: {e}");
        }
    }
}

/// Append-only in-memory audit log.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: RwLock<Vec<HistoryEntry>>,
}

impl InMemoryAuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Internal` if the lock is poisoned.
    pub fn entries(&self) -> GraphResult<Vec<HistoryEntry>> {
        let entries = self.entries.read().map_err(|_| lock_err("audit.entries"))?;
        Ok(entries.clone())
    }

    /// Number of recorded entries.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Internal` if the lock is poisoned.
    pub fn len(&self) -> GraphResult<usize> {
        let entries = self.entries.read().map_err(|_| lock_err("audit.len"))?;
        Ok(entries.len())
    }

    /// Returns true if nothing has been recorded.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::Internal` if the lock is poisoned.
    pub fn is_empty(&self) -> GraphResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: HistoryEntry) -> GraphResult<()> {
        let mut entries = self.entries.write().map_err(|_| lock_err("audit.record"))?;
        entries.push(entry);
        Ok(())
    }

    fn history_for(&self, node: &NodeId) -> GraphResult<Vec<HistoryEntry>> {
        let entries = self.entries.read().map_err(|_| lock_err("audit.history_for"))?;
        // Insertion order breaks timestamp ties; later records come first.
        let mut out: Vec<(usize, HistoryEntry)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| &e.target == node)
            .map(|(i, e)| (i, e.clone()))
            .collect();
        out.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then_with(|| ib.cmp(ia)));
        Ok(out.into_iter().map(|(_, e)| e).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_history_for_is_newest_first() {
        let log = InMemoryAuditLog::new();
        let v1 = NodeId::vendor(1);
        log.record(HistoryEntry::new(AuditAction::NodeCreated, "user:reconciler", v1.clone(), at(8)))
            .unwrap();
        log.record(HistoryEntry::new(AuditAction::VendorMerge, "user:default", v1.clone(), at(10)))
            .unwrap();
        log.record(HistoryEntry::new(AuditAction::WasMerged, "user:default", NodeId::vendor(2), at(10)))
            .unwrap();

        let history = log.history_for(&v1).unwrap();
        let actions: Vec<AuditAction> = history.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::VendorMerge, AuditAction::NodeCreated]);
        assert_eq!(log.len().unwrap(), 3);
    }

    #[test]
    fn test_same_timestamp_keeps_reverse_insertion_order() {
        let log = InMemoryAuditLog::new();
        let v1 = NodeId::vendor(1);
        log.record(HistoryEntry::new(AuditAction::MergeProposed, "a", v1.clone(), at(9))).unwrap();
        log.record(HistoryEntry::new(AuditAction::MergeApproved, "b", v1.clone(), at(9))).unwrap();

        let history = log.history_for(&v1).unwrap();
        assert_eq!(history[0].action, AuditAction::MergeApproved);
        assert_eq!(history[1].action, AuditAction::MergeProposed);
    }

    #[test]
    fn test_action_serializes_screaming_snake() {
        let json = serde_json::to_value(AuditAction::ReconciliationMerge).unwrap();
        assert_eq!(json, serde_json::json!("RECONCILIATION_MERGE"));
        assert_eq!(AuditAction::WasMerged.to_string(), "WAS_MERGED");
    }

    #[test]
    fn test_entry_details() {
        let entry = HistoryEntry::new(AuditAction::VendorMerge, "user:default", NodeId::vendor(1), at(1))
            .with_details(serde_json::json!({"merged_node": "node:vendor:2"}));
        assert_eq!(entry.details["merged_node"], "node:vendor:2");
    }
}
