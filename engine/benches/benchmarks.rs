//! Performance benchmarks for stylesync-engine

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use stylesync_engine::{compare_revision, StyleDoc, SyncId};

fn bench_revision_compare(c: &mut Criterion) {
    c.bench_function("compare_revision", |b| {
        b.iter(|| compare_revision(black_box(1706745600000), black_box(1706745601000)))
    });
}

fn bench_document_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_codec");

    let mut doc = StyleDoc::new(
        json!({
            "name": "Midnight Reader",
            "enabled": true,
            "sections": [{"code": "body { background: #111; color: #ddd }"}],
        }),
        1706745600000,
    );
    doc.id = Some(42);

    group.bench_function("serialize", |b| {
        b.iter(|| serde_json::to_string(black_box(&doc)).unwrap())
    });

    let json = serde_json::to_string(&doc).unwrap();
    group.bench_function("deserialize", |b| {
        b.iter(|| serde_json::from_str::<StyleDoc>(black_box(&json)).unwrap())
    });

    group.finish();
}

fn bench_sync_id(c: &mut Criterion) {
    c.bench_function("sync_id_new", |b| b.iter(SyncId::new));
}

criterion_group!(
    benches,
    bench_revision_compare,
    bench_document_codec,
    bench_sync_id
);
criterion_main!(benches);
