use std::time::Instant;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use spendgraph::{
    derive_view_graph, merge, Edge, EdgeId, EdgeKind, EdgeStatus, EntityStore, FilterConfig, FlowStats,
    InMemoryAuditLog, MergeRequest, Node, NodeId, NodeKind, SelectionModel,
};

const JOBS: u32 = 50;
const VENDORS: u32 = 1_000;
const EDGES_PER_VENDOR: u32 = 8;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

// One company, 50 jobs, 1000 vendors, 8 dated invoices per vendor plus one payment.
fn make_store() -> EntityStore {
    let mut nodes = vec![Node::new(NodeId::company("hq"), NodeKind::CentralCompany, "HQ")];
    nodes.extend((0..JOBS).map(|j| Node::new(NodeId::job(j), NodeKind::Job, format!("Job {j}"))));
    nodes.extend((0..VENDORS).map(|v| {
        Node::new(NodeId::vendor(v), NodeKind::Vendor, format!("Vendor {v}"))
            .with_stats(FlowStats::new(0.0, 100.0, u64::from(EDGES_PER_VENDOR)))
    }));

    let statuses = [EdgeStatus::Pending, EdgeStatus::Approved, EdgeStatus::Unapproved];
    let mut edges = Vec::new();
    for v in 0..VENDORS {
        for k in 0..EDGES_PER_VENDOR {
            let n = v * EDGES_PER_VENDOR + k;
            edges.push(
                Edge::new(EdgeId::new(format!("inv:{n}")).unwrap(), EdgeKind::Invoice, NodeId::vendor(v), NodeId::job(n % JOBS))
                    .with_amount(f64::from(n % 5_000))
                    .with_date(today() - Duration::days(i64::from(n % 400)))
                    .with_status(statuses[(n % 3) as usize]),
            );
        }
        edges.push(
            Edge::new(EdgeId::new(format!("pay:{v}")).unwrap(), EdgeKind::Payment, NodeId::company("hq"), NodeId::vendor(v))
                .with_amount(100.0),
        );
    }

    let (store, _) = EntityStore::from_dataset(nodes, edges);
    store
}

fn bench_derive_view(c: &mut Criterion) {
    let store = make_store();
    let mut group = c.benchmark_group("derive_view");
    group.throughput(Throughput::Elements(store.edge_count() as u64));

    group.bench_function("default_filter", |b| {
        let config = FilterConfig::default();
        let selection = SelectionModel::new();
        b.iter(|| derive_view_graph(&store, &config, &selection, today()));
    });

    group.bench_function("narrow_filter_with_selection", |b| {
        let mut config = FilterConfig::default();
        config.set_rolling_window(3).unwrap();
        config.set_statuses([EdgeStatus::Approved]);
        config.set_visibility(EdgeKind::Payment, false);
        let mut selection = SelectionModel::new();
        selection.toggle(NodeId::vendor(1));
        selection.toggle(NodeId::vendor(2));
        b.iter(|| derive_view_graph(&store, &config, &selection, today()));
    });

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Elements(1));

    group.bench_function("merge_vendor_pair", |b| {
        b.iter_custom(|iters| {
            // Fresh store per sample; each iteration folds a different victim.
            let mut store = make_store();
            let audit = InMemoryAuditLog::new();
            let now = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
            let iters = iters.min(u64::from(VENDORS - 1));

            let start = Instant::now();
            for i in 0..iters {
                let victim = NodeId::vendor(i + 1);
                merge(&mut store, &MergeRequest::new(NodeId::vendor(0), victim), &audit, now).unwrap();
            }
            start.elapsed()
        });
    });

    group.finish();
}

criterion_group!(view_pipeline, bench_derive_view, bench_merge);
criterion_main!(view_pipeline);
