//! Restore path and paging benchmarks.
//!
//! Compares the streaming (fast) restore against the indexed (slow) restore
//! for objects whose class layout is unchanged, measures the cost of a
//! streaming attempt that falls back after schema drift, and times a full
//! page-out/page-in cycle of one scene.
//!
//! Run with: `cargo bench --bench restore_paths`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cairn_state::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An object with `fields` scalar fields plus one nested aggregate.
fn wide_object(fields: usize) -> DynamicObject {
    let mut obj = DynamicObject::new("Wide");
    for i in 0..fields {
        obj = match i % 3 {
            0 => obj.with_value(format!("f{i}"), FieldValue::U32(i as u32)),
            1 => obj.with_value(format!("f{i}"), FieldValue::F64(i as f64 * 0.5)),
            _ => obj.with_value(format!("f{i}"), FieldValue::String(format!("value {i}"))),
        };
    }
    obj.with_struct(
        "inner",
        DynamicObject::new("Inner")
            .with_value("x", FieldValue::F32(1.0))
            .with_value("y", FieldValue::F32(2.0)),
    )
}

/// The same class with its first field removed, forcing a fast-path miss.
fn drifted_object(fields: usize) -> DynamicObject {
    let full = wide_object(fields + 1);
    let mut obj = DynamicObject::new("Wide");
    for i in 1..=fields {
        if let Some(value) = full.get(&format!("f{i}")) {
            obj = obj.with_value(format!("f{i}"), value.clone());
        }
    }
    obj.with_struct(
        "inner",
        DynamicObject::new("Inner")
            .with_value("x", FieldValue::F32(0.0))
            .with_value("y", FieldValue::F32(0.0)),
    )
}

fn stored(fields: usize) -> (ClassMetadata, PropertyData) {
    let mut meta = ClassMetadata::new();
    let data = store_properties(&wide_object(fields), &mut meta, &NullReferences)
        .expect("store benchmark object");
    (meta, data)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_restore_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("restore_paths");
    for fields in [8usize, 64, 256] {
        let (meta, data) = stored(fields);
        let template = wide_object(fields);

        group.bench_with_input(BenchmarkId::new("fast", fields), &fields, |b, _| {
            b.iter(|| {
                let mut target = template.clone();
                let stats =
                    restore_properties(&mut target, &data, &meta, &NullReferences, RestorePath::Auto)
                        .expect("fast restore");
                black_box(stats);
            });
        });

        group.bench_with_input(BenchmarkId::new("forced_slow", fields), &fields, |b, _| {
            b.iter(|| {
                let mut target = template.clone();
                let stats = restore_properties(
                    &mut target,
                    &data,
                    &meta,
                    &NullReferences,
                    RestorePath::ForceSlow,
                )
                .expect("slow restore");
                black_box(stats);
            });
        });
    }
    group.finish();
}

fn bench_drift_fallback(c: &mut Criterion) {
    let fields = 64;
    let (meta, data) = stored(fields);
    let template = drifted_object(fields - 1);

    c.bench_function("restore_drifted_64", |b| {
        b.iter(|| {
            let mut target = template.clone();
            let stats =
                restore_properties(&mut target, &data, &meta, &NullReferences, RestorePath::Auto)
                    .expect("drifted restore");
            black_box(stats);
        });
    });
}

fn bench_scene_paging(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("cairn-bench-{}", std::process::id()));
    let store = SceneStore::new(&dir).expect("open shard dir");

    let mut scene = SceneData::new("Bench");
    for i in 0..200 {
        let data = store_object(&wide_object(16), &mut scene.meta, &NullReferences)
            .expect("store scene object");
        scene.objects.insert(format!("Wide_{i}"), data);
    }
    store.insert_resident(scene);

    c.bench_function("page_out_page_in_200", |b| {
        b.iter(|| {
            black_box(store.release("Bench").expect("release"));
            black_box(store.load("Bench").expect("load"));
        });
    });

    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(
    benches,
    bench_restore_paths,
    bench_drift_fallback,
    bench_scene_paging,
);
criterion_main!(benches);
