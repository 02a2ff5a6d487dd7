//! Session coordinator.
//!
//! `GraphSession` owns the store, the selection, the filter, the
//! reconciliation queue and the merge proposals. Every mutation is a
//! `&mut self` method, so there is exactly one writer; threads share a
//! session through [`SharedSession`] and see each mutation whole.
//!
//! Background refreshes are sequenced by generation tickets. A result is
//! applied only if its ticket is still the newest of its kind; anything older
//! is dropped. Changing the date or amount range also retires in-flight
//! dataset tickets, since their results were filtered by the old query.
//! A refresh replaces the dataset wholesale, so local edits not
//! yet reported upstream can be overwritten by the next refresh.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditSink, HistoryEntry, InMemoryAuditLog};
use crate::config::SessionConfig;
use crate::edge::EdgeStatus;
use crate::error::{GraphError, GraphResult, MergeError, TransportError};
use crate::filter::{AmountRange, FilterConfig, KindKey};
use crate::merge::{merge, MergeOutcome, MergeProposals, MergeRequest, ProposalRequest};
use crate::node::NodeId;
use crate::reconcile::{ReconciliationQueue, ReconciliationTask, Resolution, ResolveAction, TaskId};
use crate::selection::{EntityRef, SelectionModel};
use crate::store::{EntityStore, LoadReport};
use crate::time::{Clock, DateRange, SystemClock};
use crate::transport::{Dataset, EdgeQuery, GraphSource};
use crate::view::{derive_view_graph_with_threshold, ViewGraph};

/// Maximum number of spotlight search hits.
pub const SEARCH_LIMIT: usize = 50;

/// A session shared between threads.
pub type SharedSession = Arc<Mutex<GraphSession>>;

/// Locks a shared session.
///
/// # Errors
///
/// Returns `GraphError::Internal` if a previous holder panicked.
pub fn lock_session(session: &SharedSession) -> GraphResult<MutexGuard<'_, GraphSession>> {
    session
        .lock()
        .map_err(|_| GraphError::internal("poisoned lock: session"))
}

/// Which background fetch a ticket or advisory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// Nodes and edges.
    Dataset,
    /// Reconciliation queue.
    Queue,
}

impl fmt::Display for RefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset => write!(f, "dataset"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Identifies one in-flight refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefreshTicket {
    kind: RefreshKind,
    generation: u64,
}

impl RefreshTicket {
    /// Which fetch this ticket is for.
    #[must_use]
    pub const fn kind(self) -> RefreshKind {
        self.kind
    }

    /// Generation number; larger is newer.
    #[must_use]
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

/// Data delivered by a refresh.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshPayload {
    /// A full dataset.
    Dataset(Dataset),
    /// The upstream reconciliation queue.
    Queue(Vec<ReconciliationTask>),
}

impl RefreshPayload {
    const fn kind(&self) -> RefreshKind {
        match self {
            Self::Dataset(_) => RefreshKind::Dataset,
            Self::Queue(_) => RefreshKind::Queue,
        }
    }
}

/// Where an advisory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorySource {
    /// A background refresh.
    Refresh(RefreshKind),
    /// Reporting a local decision upstream.
    Upstream,
}

/// Non-fatal, user-visible notice that something in the background failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    /// What failed.
    pub source: AdvisorySource,
    /// Error text.
    pub message: String,
    /// Whether retrying may help.
    pub retryable: bool,
    /// When it was raised.
    pub raised_at: DateTime<Utc>,
}

/// What happened to a refresh result.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// A dataset replaced the store.
    Loaded(LoadReport),
    /// The reconciliation queue was replaced; carries the pending count.
    QueueSynced(usize),
    /// A newer refresh of the same kind started, or the server-side query
    /// changed after the fetch began; the result was dropped.
    Stale,
    /// The fetch failed; the previous state stays and an advisory is raised.
    Failed(Advisory),
}

/// Single-writer owner of all session state.
pub struct GraphSession {
    config: SessionConfig,
    store: EntityStore,
    selection: SelectionModel,
    filter: FilterConfig,
    queue: ReconciliationQueue,
    proposals: MergeProposals,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    upstream: Option<Arc<dyn GraphSource>>,
    dataset_generation: u64,
    queue_generation: u64,
    advisory: Option<Advisory>,
}

impl fmt::Debug for GraphSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSession")
            .field("nodes", &self.store.node_count())
            .field("edges", &self.store.edge_count())
            .field("revision", &self.store.revision())
            .field("selection", &self.selection.selected().len())
            .field("pending_tasks", &self.queue.pending_count())
            .field("advisory", &self.advisory)
            .finish_non_exhaustive()
    }
}

impl Default for GraphSession {
    fn default() -> Self {
        Self::new(
            SessionConfig::default(),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(SystemClock),
        )
    }
}

impl GraphSession {
    /// Creates an empty session.
    #[must_use]
    pub fn new(config: SessionConfig, audit: Arc<dyn AuditSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            filter: config.filter.clone(),
            config,
            store: EntityStore::new(),
            selection: SelectionModel::new(),
            queue: ReconciliationQueue::new(),
            proposals: MergeProposals::new(),
            audit,
            clock,
            upstream: None,
            dataset_generation: 0,
            queue_generation: 0,
            advisory: None,
        }
    }

    /// Reports local decisions to `source` after they commit.
    #[must_use]
    pub fn with_upstream(mut self, source: Arc<dyn GraphSource>) -> Self {
        self.upstream = Some(source);
        self
    }

    /// Wraps the session for sharing between threads.
    #[must_use]
    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    /// Configuration the session was created with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The entity store.
    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// The selection.
    #[must_use]
    pub const fn selection(&self) -> &SelectionModel {
        &self.selection
    }

    /// The current filter.
    #[must_use]
    pub const fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    /// The reconciliation queue.
    #[must_use]
    pub const fn queue(&self) -> &ReconciliationQueue {
        &self.queue
    }

    /// The merge proposals.
    #[must_use]
    pub const fn proposals(&self) -> &MergeProposals {
        &self.proposals
    }

    /// The latest unresolved background failure, if any.
    #[must_use]
    pub const fn advisory(&self) -> Option<&Advisory> {
        self.advisory.as_ref()
    }

    /// Dismisses the current advisory.
    pub fn dismiss_advisory(&mut self) {
        self.advisory = None;
    }

    // ------------------------------------------------------------------
    // Dataset
    // ------------------------------------------------------------------

    /// Replaces the dataset and drops selection refs that disappeared.
    pub fn load(&mut self, dataset: Dataset) -> LoadReport {
        let report = self.store.load(dataset.nodes, dataset.edges);
        self.selection.prune(&self.store);
        report
    }

    /// Derives the view graph for today.
    #[must_use]
    pub fn view(&self) -> ViewGraph {
        derive_view_graph_with_threshold(
            &self.store,
            &self.filter,
            &self.selection,
            self.clock.today(),
            self.config.view.high_density_threshold,
        )
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// See [`SelectionModel::select_single`].
    pub fn select_single(&mut self, entity: impl Into<EntityRef>) {
        self.selection.select_single(entity);
    }

    /// See [`SelectionModel::toggle`].
    pub fn toggle(&mut self, entity: impl Into<EntityRef>) {
        self.selection.toggle(entity);
    }

    /// Clears the selection.
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Node ids currently highlighted.
    #[must_use]
    pub fn highlighted(&self) -> Vec<NodeId> {
        self.selection.highlighted(&self.store)
    }

    /// Spotlight search; the hits become the explicit highlight.
    pub fn search(&mut self, query: &str) -> Vec<NodeId> {
        let hits: Vec<NodeId> = self
            .store
            .search(query, SEARCH_LIMIT)
            .into_iter()
            .map(|n| n.id.clone())
            .collect();
        self.selection.set_highlight(hits.clone());
        hits
    }

    // ------------------------------------------------------------------
    // Filter
    // ------------------------------------------------------------------

    /// Shows or hides a kind.
    pub fn set_visibility(&mut self, key: impl Into<KindKey>, visible: bool) {
        self.filter.set_visibility(key, visible);
    }

    /// Sets the rolling window.
    ///
    /// # Errors
    ///
    /// `ValidationError::WindowOutOfRange` outside `1..=12`.
    pub fn set_rolling_window(&mut self, months: u32) -> GraphResult<()> {
        Ok(self.filter.set_rolling_window(months)?)
    }

    /// Sets the absolute date range.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidDateRange` if inverted.
    pub fn set_date_range(&mut self, range: DateRange) -> GraphResult<()> {
        let before = self.edge_query();
        self.filter.set_date_range(range)?;
        self.query_changed(before);
        Ok(())
    }

    /// Sets the amount range.
    ///
    /// # Errors
    ///
    /// `ValidationError` for negative, non-finite or inverted bounds.
    pub fn set_amount_range(&mut self, range: AmountRange) -> GraphResult<()> {
        let before = self.edge_query();
        self.filter.set_amount_range(range)?;
        self.query_changed(before);
        Ok(())
    }

    /// Replaces the shown status set.
    pub fn set_statuses(&mut self, statuses: impl IntoIterator<Item = EdgeStatus>) {
        self.filter.set_statuses(statuses);
    }

    /// Restores the configured initial filter.
    pub fn reset_filter(&mut self) {
        let before = self.edge_query();
        self.filter = self.config.filter.clone();
        self.query_changed(before);
    }

    /// Server-side part of the current filter.
    #[must_use]
    pub fn edge_query(&self) -> EdgeQuery {
        self.filter.edge_query()
    }

    // ------------------------------------------------------------------
    // Refresh sequencing
    // ------------------------------------------------------------------

    /// Starts a refresh. Any older ticket of the same kind becomes stale.
    pub fn begin_refresh(&mut self, kind: RefreshKind) -> RefreshTicket {
        let generation = self.invalidate(kind);
        RefreshTicket { kind, generation }
    }

    // Makes every outstanding ticket of `kind` stale; returns the new generation.
    fn invalidate(&mut self, kind: RefreshKind) -> u64 {
        let generation = match kind {
            RefreshKind::Dataset => &mut self.dataset_generation,
            RefreshKind::Queue => &mut self.queue_generation,
        };
        *generation += 1;
        *generation
    }

    // A dataset fetched with an older server-side query no longer matches the filter.
    fn query_changed(&mut self, before: EdgeQuery) {
        if self.edge_query() != before {
            self.invalidate(RefreshKind::Dataset);
        }
    }

    /// Checks that `ticket` is still the newest of its kind.
    ///
    /// # Errors
    ///
    /// `TransportError::StaleResponse` if a newer refresh started.
    pub fn check_ticket(&self, ticket: RefreshTicket) -> Result<(), TransportError> {
        let latest = match ticket.kind {
            RefreshKind::Dataset => self.dataset_generation,
            RefreshKind::Queue => self.queue_generation,
        };
        if ticket.generation == latest {
            Ok(())
        } else {
            Err(TransportError::StaleResponse {
                ticket: ticket.generation,
                latest,
            })
        }
    }

    /// Applies a refresh result if `ticket` is still current.
    ///
    /// Stale results are dropped silently. A failed fetch keeps the previous
    /// state and raises an advisory; a successful one clears it.
    ///
    /// # Errors
    ///
    /// `GraphError::Internal` if the payload kind does not match the ticket.
    pub fn apply_refresh(
        &mut self,
        ticket: RefreshTicket,
        result: Result<RefreshPayload, TransportError>,
    ) -> GraphResult<RefreshOutcome> {
        if let Err(e) = self.check_ticket(ticket) {
            tracing::debug!(kind = %ticket.kind, "dropping refresh result: {e}");
            return Ok(RefreshOutcome::Stale);
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                let advisory = Advisory {
                    source: AdvisorySource::Refresh(ticket.kind),
                    retryable: GraphError::from(e.clone()).is_retryable(),
                    message: e.to_string(),
                    raised_at: self.clock.now(),
                };
                tracing::warn!(kind = %ticket.kind, "refresh failed, keeping last good data: {e}");
                self.advisory = Some(advisory.clone());
                return Ok(RefreshOutcome::Failed(advisory));
            }
        };

        if payload.kind() != ticket.kind {
            return Err(GraphError::internal(format!(
                "{} payload delivered for a {} ticket",
                payload.kind(),
                ticket.kind
            )));
        }

        let outcome = match payload {
            RefreshPayload::Dataset(dataset) => RefreshOutcome::Loaded(self.load(dataset)),
            RefreshPayload::Queue(tasks) => RefreshOutcome::QueueSynced(self.queue.sync(tasks)),
        };
        if matches!(self.advisory, Some(Advisory { source: AdvisorySource::Refresh(_), .. })) {
            self.advisory = None;
        }
        Ok(outcome)
    }

    /// Fetches and applies one refresh synchronously.
    ///
    /// # Errors
    ///
    /// See [`GraphSession::apply_refresh`].
    pub fn refresh_now(&mut self, kind: RefreshKind, source: &dyn GraphSource) -> GraphResult<RefreshOutcome> {
        let ticket = self.begin_refresh(kind);
        let result = fetch(source, kind, &self.edge_query());
        self.apply_refresh(ticket, result)
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Pending reconciliation tasks, oldest first.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<&ReconciliationTask> {
        self.queue.list_pending()
    }

    /// Resolves a task as the configured reconciler.
    ///
    /// # Errors
    ///
    /// See [`ReconciliationQueue::resolve`].
    pub fn resolve_task(&mut self, task_id: TaskId, action: ResolveAction) -> GraphResult<Resolution> {
        let actor = self.config.actors.reconciler.clone();
        let resolution = self.queue.resolve(
            task_id,
            action,
            &mut self.store,
            self.audit.as_ref(),
            &actor,
            self.clock.now(),
        )?;
        self.selection.prune(&self.store);
        if let Some(upstream) = self.upstream.clone() {
            let reported = upstream.resolve_task(task_id, action);
            self.note_upstream(reported);
        }
        Ok(resolution)
    }

    // ------------------------------------------------------------------
    // Merging
    // ------------------------------------------------------------------

    /// Merges the two selected nodes, picking the survivor by the configured
    /// policy. The survivor becomes the selection.
    ///
    /// # Errors
    ///
    /// - `MergeError::InvalidSelection` unless exactly two nodes are selected
    /// - any merge error
    pub fn merge_selected(&mut self, reason: &str) -> GraphResult<MergeOutcome> {
        let Some((first, second)) = self.selection.merge_candidates() else {
            return Err(MergeError::InvalidSelection {
                selected: self.selection.selected().len(),
            }
            .into());
        };
        let (survivor, victim) = self
            .config
            .survivor_policy
            .choose(&self.store, first.clone(), second.clone())?;
        let outcome = self.merge_nodes(survivor, victim, reason)?;
        self.selection.select_single(outcome.survivor.id.clone());
        Ok(outcome)
    }

    /// Folds `victim` into `survivor` as the configured merge actor.
    ///
    /// # Errors
    ///
    /// See [`crate::merge::merge`].
    pub fn merge_nodes(&mut self, survivor: NodeId, victim: NodeId, reason: &str) -> GraphResult<MergeOutcome> {
        let request = MergeRequest::new(survivor, victim)
            .actor(self.config.actors.merge.clone())
            .reason(reason);
        let outcome = merge(&mut self.store, &request, self.audit.as_ref(), self.clock.now())?;
        self.selection.prune(&self.store);
        if let Some(upstream) = self.upstream.clone() {
            let reported = upstream.manual_merge(&request.survivor, &request.victim, reason);
            self.note_upstream(reported);
        }
        Ok(outcome)
    }

    /// Records a merge proposal.
    ///
    /// # Errors
    ///
    /// See [`MergeProposals::propose`].
    pub fn propose_merge(&mut self, survivor: NodeId, victims: Vec<NodeId>, reason: &str) -> GraphResult<u64> {
        let request = ProposalRequest {
            survivor,
            victims,
            proposed_by: self.config.actors.merge.clone(),
            reason: reason.to_string(),
        };
        self.proposals
            .propose(&self.store, request, self.audit.as_ref(), self.clock.now())
    }

    /// Approves a proposal and applies its merges.
    ///
    /// # Errors
    ///
    /// See [`MergeProposals::approve`].
    pub fn approve_proposal(
        &mut self,
        id: u64,
        approved_by: &str,
        notes: Option<String>,
    ) -> GraphResult<Vec<MergeOutcome>> {
        let outcomes = self.proposals.approve(
            id,
            &mut self.store,
            approved_by,
            notes,
            self.audit.as_ref(),
            self.clock.now(),
        )?;
        self.selection.prune(&self.store);
        Ok(outcomes)
    }

    /// Rejects a proposal.
    ///
    /// # Errors
    ///
    /// See [`MergeProposals::reject`].
    pub fn reject_proposal(&mut self, id: u64, rejected_by: &str, reason: &str) -> GraphResult<()> {
        self.proposals
            .reject(id, rejected_by, reason, self.audit.as_ref(), self.clock.now())
    }

    /// Audit history of a node, newest first.
    ///
    /// # Errors
    ///
    /// Propagates audit sink failures.
    pub fn history_for(&self, node: &NodeId) -> GraphResult<Vec<HistoryEntry>> {
        self.audit.history_for(node)
    }

    fn note_upstream(&mut self, reported: Result<(), TransportError>) {
        if let Err(e) = reported {
            tracing::warn!("failed to report decision upstream: {e}");
            self.advisory = Some(Advisory {
                source: AdvisorySource::Upstream,
                retryable: GraphError::from(e.clone()).is_retryable(),
                message: e.to_string(),
                raised_at: self.clock.now(),
            });
        }
    }
}

/// Runs the fetch for `kind`. Callers hold no session lock while this runs.
pub(crate) fn fetch(
    source: &dyn GraphSource,
    kind: RefreshKind,
    query: &EdgeQuery,
) -> Result<RefreshPayload, TransportError> {
    match kind {
        RefreshKind::Dataset => source.fetch_dataset(query).map(RefreshPayload::Dataset),
        RefreshKind::Queue => source.fetch_reconciliation_queue().map(RefreshPayload::Queue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    use crate::edge::{Edge, EdgeId, EdgeKind};
    use crate::node::{FlowStats, Node, NodeKind};
    use crate::reconcile::{MatchScore, SourceRecord, TaskStatus};
    use crate::time::FixedClock;
    use crate::transport::{InMemorySource, SourceCall};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn session() -> GraphSession {
        GraphSession::new(
            SessionConfig::default(),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(FixedClock(now())),
        )
    }

    fn dataset(label: &str) -> Dataset {
        Dataset {
            nodes: vec![
                Node::new(NodeId::vendor(1), NodeKind::Vendor, label).with_stats(FlowStats::new(0.0, 100.0, 1)),
                Node::new(NodeId::vendor(2), NodeKind::Vendor, "Dup").with_stats(FlowStats::new(0.0, 50.0, 1)),
                Node::new(NodeId::job(1), NodeKind::Job, "Job"),
            ],
            edges: vec![
                Edge::new(EdgeId::new("e1").unwrap(), EdgeKind::Invoice, NodeId::vendor(1), NodeId::job(1))
                    .with_amount(100.0),
                Edge::new(EdgeId::new("e2").unwrap(), EdgeKind::Invoice, NodeId::vendor(2), NodeId::job(1))
                    .with_amount(50.0),
            ],
        }
    }

    fn task(id: u64) -> ReconciliationTask {
        ReconciliationTask {
            task_id: TaskId::new(id),
            status: TaskStatus::Pending,
            source_record: SourceRecord::new("Acme", 10.0, "csv"),
            candidate: NodeId::vendor(1),
            score: MatchScore::new(80.0).unwrap(),
            created_at: now(),
        }
    }

    #[test]
    fn test_stale_ticket_never_overwrites_newer_load() {
        let mut session = session();
        let old = session.begin_refresh(RefreshKind::Dataset);
        let new = session.begin_refresh(RefreshKind::Dataset);

        let outcome = session
            .apply_refresh(new, Ok(RefreshPayload::Dataset(dataset("new"))))
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::Loaded(_)));

        let outcome = session
            .apply_refresh(old, Ok(RefreshPayload::Dataset(dataset("old"))))
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Stale);
        assert_eq!(session.store().get_node(&NodeId::vendor(1)).unwrap().label, "new");
        assert!(session.check_ticket(old).is_err());
    }

    #[test]
    fn test_query_change_makes_dataset_ticket_stale() {
        let mut session = session();
        let ticket = session.begin_refresh(RefreshKind::Dataset);
        let queue = session.begin_refresh(RefreshKind::Queue);
        session
            .set_amount_range(AmountRange::new(Some(100.0), None).unwrap())
            .unwrap();

        let outcome = session
            .apply_refresh(ticket, Ok(RefreshPayload::Dataset(dataset("old query"))))
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::Stale);
        assert_eq!(session.store().node_count(), 0);
        assert!(session.check_ticket(queue).is_ok());

        let ticket = session.begin_refresh(RefreshKind::Dataset);
        session
            .set_date_range(DateRange::new(chrono::NaiveDate::from_ymd_opt(2024, 1, 1), None).unwrap())
            .unwrap();
        assert!(session.check_ticket(ticket).is_err());

        let ticket = session.begin_refresh(RefreshKind::Dataset);
        session.reset_filter();
        assert!(session.check_ticket(ticket).is_err());
    }

    #[test]
    fn test_client_side_filter_change_keeps_dataset_ticket() {
        let mut session = session();
        let ticket = session.begin_refresh(RefreshKind::Dataset);
        session.set_rolling_window(3).unwrap();
        session.set_statuses([EdgeStatus::Approved]);
        session.set_visibility(EdgeKind::Payment, false);
        // Re-applying an identical range does not change the query.
        session.set_amount_range(AmountRange::unbounded()).unwrap();
        assert!(session.check_ticket(ticket).is_ok());
    }

    #[test]
    fn test_tickets_are_per_kind() {
        let mut session = session();
        let data = session.begin_refresh(RefreshKind::Dataset);
        let queue = session.begin_refresh(RefreshKind::Queue);
        assert!(session.check_ticket(data).is_ok());
        assert!(session.check_ticket(queue).is_ok());

        let outcome = session
            .apply_refresh(queue, Ok(RefreshPayload::Queue(vec![task(1)])))
            .unwrap();
        assert_eq!(outcome, RefreshOutcome::QueueSynced(1));
    }

    #[test]
    fn test_failed_refresh_keeps_data_and_raises_advisory() {
        let mut session = session();
        session.load(dataset("good"));
        let revision = session.store().revision();

        let ticket = session.begin_refresh(RefreshKind::Dataset);
        let outcome = session
            .apply_refresh(
                ticket,
                Err(TransportError::ConnectionFailed {
                    message: "refused".to_string(),
                }),
            )
            .unwrap();
        assert!(matches!(outcome, RefreshOutcome::Failed(_)));
        assert_eq!(session.store().revision(), revision);
        assert_eq!(session.store().node_count(), 3);

        let advisory = session.advisory().unwrap();
        assert_eq!(advisory.source, AdvisorySource::Refresh(RefreshKind::Dataset));
        assert!(advisory.retryable);

        let ticket = session.begin_refresh(RefreshKind::Dataset);
        session
            .apply_refresh(ticket, Ok(RefreshPayload::Dataset(dataset("fresh"))))
            .unwrap();
        assert!(session.advisory().is_none());
    }

    #[test]
    fn test_mismatched_payload_is_internal_error() {
        let mut session = session();
        let ticket = session.begin_refresh(RefreshKind::Queue);
        let err = session
            .apply_refresh(ticket, Ok(RefreshPayload::Dataset(Dataset::default())))
            .unwrap_err();
        assert!(matches!(err, GraphError::Internal { .. }));
    }

    #[test]
    fn test_merge_selected_uses_policy_and_reports_upstream() {
        let source = Arc::new(InMemorySource::new(Dataset::default()));
        let mut session = session().with_upstream(source.clone());
        session.load(dataset("V1"));

        assert!(matches!(
            session.merge_selected("dup"),
            Err(GraphError::InvalidMerge(MergeError::InvalidSelection { selected: 0 }))
        ));

        session.toggle(NodeId::vendor(1));
        session.toggle(NodeId::vendor(2));
        let outcome = session.merge_selected("dup").unwrap();
        assert_eq!(outcome.survivor.id, NodeId::vendor(1));
        assert_eq!(session.selection().selected(), &[EntityRef::Node(NodeId::vendor(1))]);
        assert_eq!(session.store().node_count(), 2);

        let calls = source.calls().unwrap();
        assert_eq!(
            calls,
            vec![SourceCall::ManualMerge {
                survivor: NodeId::vendor(1),
                victim: NodeId::vendor(2),
                reason: "dup".to_string(),
            }]
        );
        let history = session.history_for(&NodeId::vendor(1)).unwrap();
        assert_eq!(history[0].actor, "user:default");
    }

    #[test]
    fn test_upstream_failure_is_advisory_not_error() {
        let source = Arc::new(InMemorySource::new(Dataset::default()));
        source
            .set_failure(Some(TransportError::Server {
                code: 500,
                message: "down".to_string(),
            }))
            .unwrap();
        let mut session = session().with_upstream(source);
        session.load(dataset("V1"));

        session.merge_nodes(NodeId::vendor(1), NodeId::vendor(2), "dup").unwrap();
        assert_eq!(session.advisory().unwrap().source, AdvisorySource::Upstream);
    }

    #[test]
    fn test_resolve_task_through_session() {
        let mut session = session();
        session.load(dataset("V1"));
        let ticket = session.begin_refresh(RefreshKind::Queue);
        session
            .apply_refresh(ticket, Ok(RefreshPayload::Queue(vec![task(1), task(2)])))
            .unwrap();
        assert_eq!(session.pending_tasks().len(), 2);

        session.resolve_task(TaskId::new(1), ResolveAction::CreateNew).unwrap();
        assert_eq!(session.pending_tasks().len(), 1);
        assert!(session.resolve_task(TaskId::new(1), ResolveAction::Merge).is_err());
    }

    #[test]
    fn test_search_sets_highlight_until_selection() {
        let mut session = session();
        session.load(dataset("Acme"));
        let hits = session.search("acme");
        assert_eq!(hits, vec![NodeId::vendor(1)]);
        assert_eq!(session.highlighted(), vec![NodeId::vendor(1)]);

        session.select_single(NodeId::job(1));
        assert_eq!(session.highlighted(), vec![NodeId::job(1)]);
    }

    #[test]
    fn test_view_uses_session_clock_and_filter() {
        let mut session = session();
        let mut data = dataset("V1");
        data.edges[0] = data.edges[0]
            .clone()
            .with_date(now().date_naive() - chrono::Duration::days(40));
        session.load(data);

        assert_eq!(session.view().edges.len(), 2);
        session.set_rolling_window(1).unwrap();
        assert_eq!(session.view().edges.len(), 1);
        assert!(session.set_rolling_window(0).is_err());

        session.set_visibility(EdgeKind::Invoice, false);
        assert!(session.view().edges.is_empty());
        session.reset_filter();
        assert_eq!(session.view().edges.len(), 2);
    }

    #[test]
    fn test_load_prunes_selection() {
        let mut session = session();
        session.load(dataset("V1"));
        session.select_single(NodeId::vendor(2));
        session.load(Dataset::default());
        assert!(session.selection().is_empty());
    }

    #[test]
    fn test_refresh_now_round_trip() {
        let source = InMemorySource::new(dataset("remote"));
        source.set_tasks(vec![task(7)]).unwrap();
        let mut session = session();

        let outcome = session.refresh_now(RefreshKind::Dataset, &source).unwrap();
        assert!(matches!(outcome, RefreshOutcome::Loaded(ref r) if r.is_clean()));
        let outcome = session.refresh_now(RefreshKind::Queue, &source).unwrap();
        assert_eq!(outcome, RefreshOutcome::QueueSynced(1));
    }

    #[test]
    fn test_shared_session_lock() {
        let shared = session().into_shared();
        let guard = lock_session(&shared).unwrap();
        assert_eq!(guard.store().node_count(), 0);
    }
}
