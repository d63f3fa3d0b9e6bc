use std::hint::black_box;

use bidgraph_core::{EngineConfig, EntityId};
use bidgraph_engine::{Bid, BidSnapshot, ComponentRecord, LineItemRecord, LoadOptions};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

/// `groups` components of `per_group` material line items each.
fn build_snapshot(groups: usize, per_group: usize) -> BidSnapshot {
    let mut snap = BidSnapshot::new("bench", "Benchmark bid");
    for g in 0..groups {
        let mut ids = Vec::with_capacity(per_group);
        for i in 0..per_group {
            let id = format!("li-{}-{}", g, i);
            let mut record = LineItemRecord::new(id.as_str());
            record.values.base = 1.0 + i as f64;
            record.values.quantity = 2.0;
            record.values.markup_percent = 15.0;
            ids.push(EntityId::from(id));
            snap.line_items.push(record);
        }
        snap.components.push(ComponentRecord {
            id: EntityId::from(format!("c-{}", g)),
            title: format!("Component {}", g),
            line_items: ids,
            sub_components: Vec::new(),
            totals: None,
        });
    }
    snap
}

fn bench_full_assessment(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_assessment");
    for size in [10usize, 50, 200] {
        let snap = build_snapshot(size / 10, 10);
        group.bench_with_input(BenchmarkId::new("line_items", size), &snap, |b, snap| {
            b.iter(|| {
                let mut bid = Bid::new(EngineConfig::default());
                bid.load(snap.clone(), LoadOptions::without_assessment()).unwrap();
                bid.request_full_assessment();
                black_box(bid.run_until_idle())
            });
        });
    }
    group.finish();
}

fn bench_single_edit(c: &mut Criterion) {
    let mut bid = Bid::from_snapshot(build_snapshot(20, 10), EngineConfig::default()).unwrap();
    let target = EntityId::from("li-0-0");
    let mut cost = 1.0;
    c.bench_function("single_edit_propagation", |b| {
        b.iter(|| {
            cost += 1.0;
            bid.set_cost(&target, cost).unwrap();
            black_box(bid.run_until_idle())
        });
    });
}

criterion_group!(benches, bench_full_assessment, bench_single_edit);
criterion_main!(benches);
