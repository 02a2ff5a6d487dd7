use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use spendgraph::{
    lock_session, AuditAction, AuditSink, Dataset, Edge, EdgeId, EdgeKind, FixedClock, FlowStats, GraphSession,
    InMemoryAuditLog, InMemorySource, MatchScore, Node, NodeId, NodeKind, ProposalStatus, ReconciliationTask,
    RefreshKind, RefreshOutcome, RefreshPayload, RefreshScheduler, ResolveAction, SessionConfig, SourceCall,
    SourceRecord, SurvivorPolicy, TaskId, TaskStatus, TransportError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 9, 0, 0).unwrap()
}

fn dataset() -> Dataset {
    Dataset {
        nodes: vec![
            Node::new(NodeId::company("hq"), NodeKind::CentralCompany, "HQ"),
            Node::new(NodeId::job(1), NodeKind::Job, "Riverside"),
            Node::new(NodeId::vendor(1), NodeKind::Vendor, "Acme").with_stats(FlowStats::new(0.0, 100.0, 1)),
            Node::new(NodeId::vendor(2), NodeKind::Vendor, "ACME Ltd").with_stats(FlowStats::new(0.0, 40.0, 2)),
            Node::new(NodeId::vendor(3), NodeKind::Vendor, "Acme Supply").with_stats(FlowStats::new(0.0, 5.0, 1)),
        ],
        edges: vec![
            Edge::new(EdgeId::new("e1").unwrap(), EdgeKind::Invoice, NodeId::vendor(1), NodeId::job(1))
                .with_amount(100.0),
            Edge::new(EdgeId::new("e2").unwrap(), EdgeKind::Invoice, NodeId::vendor(2), NodeId::job(1))
                .with_amount(20.0),
            Edge::new(EdgeId::new("e3").unwrap(), EdgeKind::Invoice, NodeId::vendor(2), NodeId::job(1))
                .with_amount(20.0),
            Edge::new(EdgeId::new("e4").unwrap(), EdgeKind::Payment, NodeId::company("hq"), NodeId::vendor(3))
                .with_amount(5.0),
        ],
    }
}

fn task(id: u64, candidate: NodeId) -> ReconciliationTask {
    ReconciliationTask {
        task_id: TaskId::new(id),
        status: TaskStatus::Pending,
        source_record: SourceRecord::new("Acme Corp", 12.5, "accounting-import").job_id("1"),
        candidate,
        score: MatchScore::new(91.0).unwrap(),
        created_at: now(),
    }
}

fn session_with(config: SessionConfig) -> (GraphSession, Arc<InMemoryAuditLog>) {
    let audit = Arc::new(InMemoryAuditLog::new());
    let session = GraphSession::new(config, audit.clone(), Arc::new(FixedClock(now())));
    (session, audit)
}

#[test]
fn configured_survivor_policy_drives_selection_merge() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spendgraph.toml");
    std::fs::write(
        &path,
        "survivor_policy = \"most_transactions\"\n\n[actors]\nmerge = \"user:ops\"\n",
    )
    .unwrap();
    let config = SessionConfig::load(&path).unwrap();
    assert_eq!(config.survivor_policy, SurvivorPolicy::MostTransactions);

    let source = Arc::new(InMemorySource::new(Dataset::default()));
    let (session, audit) = session_with(config);
    let mut session = session.with_upstream(source.clone());
    session.load(dataset());

    // vendor 2 has two invoices, so it survives even though it was picked second.
    session.toggle(NodeId::vendor(1));
    session.toggle(NodeId::vendor(2));
    let outcome = session.merge_selected("duplicate vendor").unwrap();
    assert_eq!(outcome.survivor.id, NodeId::vendor(2));
    assert_eq!(outcome.victim, NodeId::vendor(1));
    assert_eq!(session.store().edges_of(&NodeId::vendor(2)).len(), 3);

    let view = session.view();
    assert!(view.node(&NodeId::vendor(2)).unwrap().selected);
    assert!(view.node(&NodeId::vendor(1)).is_none());

    let entries = audit.entries().unwrap();
    assert!(entries.iter().all(|e| e.actor == "user:ops"));
    assert!(matches!(source.calls().unwrap()[0], SourceCall::ManualMerge { .. }));
}

#[test]
fn stale_refresh_never_overwrites_newer_data() {
    let (mut session, _) = session_with(SessionConfig::default());
    let slow = session.begin_refresh(RefreshKind::Dataset);
    let fast = session.begin_refresh(RefreshKind::Dataset);

    session.apply_refresh(fast, Ok(RefreshPayload::Dataset(dataset()))).unwrap();
    let outcome = session
        .apply_refresh(slow, Ok(RefreshPayload::Dataset(Dataset::default())))
        .unwrap();

    assert_eq!(outcome, RefreshOutcome::Stale);
    assert_eq!(session.store().node_count(), 5);
}

#[test]
fn refresh_failure_raises_advisory_and_keeps_last_good_data() {
    init_tracing();
    let source = InMemorySource::new(dataset());
    let (mut session, _) = session_with(SessionConfig::default());
    session.refresh_now(RefreshKind::Dataset, &source).unwrap();
    let before = session.store().snapshot();

    source
        .set_failure(Some(TransportError::Server {
            code: 502,
            message: "bad gateway".to_string(),
        }))
        .unwrap();
    let outcome = session.refresh_now(RefreshKind::Dataset, &source).unwrap();
    let RefreshOutcome::Failed(advisory) = outcome else {
        panic!("expected failed refresh");
    };
    assert!(advisory.retryable);
    assert!(advisory.message.contains("bad gateway"));
    assert_eq!(session.store().snapshot(), before);
    assert_eq!(session.advisory(), Some(&advisory));

    source.set_failure(None).unwrap();
    session.refresh_now(RefreshKind::Dataset, &source).unwrap();
    assert!(session.advisory().is_none());
}

#[test]
fn reconciliation_flow_through_session() {
    let source = Arc::new(InMemorySource::new(dataset()));
    source
        .set_tasks(vec![task(1, NodeId::vendor(1)), task(2, NodeId::vendor(3))])
        .unwrap();
    let (session, audit) = session_with(SessionConfig::default());
    let mut session = session.with_upstream(source.clone());
    session.refresh_now(RefreshKind::Dataset, source.as_ref()).unwrap();
    session.refresh_now(RefreshKind::Queue, source.as_ref()).unwrap();
    assert_eq!(session.pending_tasks().len(), 2);

    let merged = session.resolve_task(TaskId::new(1), ResolveAction::Merge).unwrap();
    assert_eq!(merged.node, NodeId::vendor(1));
    let edge = merged.edge.unwrap();
    assert_eq!(session.store().get_edge(&edge).unwrap().source, NodeId::vendor(1));

    let created = session.resolve_task(TaskId::new(2), ResolveAction::CreateNew).unwrap();
    assert!(session.store().contains_node(&created.node));
    assert!(session.pending_tasks().is_empty());

    // Upstream still lists both tasks as pending; local decisions stand.
    session.refresh_now(RefreshKind::Queue, source.as_ref()).unwrap();
    assert!(session.pending_tasks().is_empty());

    let history = session.history_for(&NodeId::vendor(1)).unwrap();
    assert_eq!(history[0].action, AuditAction::ReconciliationMerge);
    assert_eq!(history[0].actor, "user:reconciler");
    assert_eq!(
        audit.history_for(&created.node).unwrap()[0].action,
        AuditAction::NodeCreated
    );
    assert_eq!(source.calls().unwrap().len(), 2);
}

#[test]
fn proposal_approval_merges_every_victim() {
    let (mut session, _) = session_with(SessionConfig::default());
    session.load(dataset());

    let id = session
        .propose_merge(NodeId::vendor(1), vec![NodeId::vendor(2), NodeId::vendor(3)], "one supplier")
        .unwrap();
    let proposal = session.proposals().get(id).unwrap();
    assert_eq!(proposal.preview.affected_edges, 3);
    assert!((proposal.preview.total_transaction_value - 45.0).abs() < 1e-9);

    let outcomes = session.approve_proposal(id, "user:lead", Some("verified".to_string())).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(session.proposals().get(id).unwrap().status, ProposalStatus::Approved);
    assert_eq!(session.store().edges_of(&NodeId::vendor(1)).len(), 4);
    assert!(session.approve_proposal(id, "user:lead", None).is_err());

    let second = session
        .propose_merge(NodeId::company("hq"), vec![NodeId::job(1)], "wrong")
        .unwrap_err();
    assert!(second.to_string().contains("Cannot merge"));
}

#[test]
fn scheduler_keeps_session_current() {
    init_tracing();
    let source = Arc::new(InMemorySource::new(dataset()));
    source.set_tasks(vec![task(5, NodeId::vendor(1))]).unwrap();
    let (session, _) = session_with(SessionConfig::default());
    let shared = session.into_shared();

    let scheduler =
        RefreshScheduler::spawn(Arc::clone(&shared), source.clone(), SessionConfig::default().refresh).unwrap();
    let outcome = scheduler.refresh_and_wait(RefreshKind::Queue).unwrap();
    assert_eq!(outcome, RefreshOutcome::QueueSynced(1));
    {
        let session = lock_session(&shared).unwrap();
        assert_eq!(session.store().node_count(), 5);
        assert_eq!(session.pending_tasks().len(), 1);
    }

    source.set_dataset(Dataset::default()).unwrap();
    scheduler.refresh_and_wait(RefreshKind::Dataset).unwrap();
    assert_eq!(lock_session(&shared).unwrap().store().node_count(), 0);
    scheduler.shutdown();
}
