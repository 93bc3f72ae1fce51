//! Benchmark for the entity state registry hot path.
//!
//! Run with: cargo bench --package morphvault_core --bench registry_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use morphvault_core::{Category, EntityStateRegistry, PresetIdentityTable};

fn benchmark_assigned_slot_lookup(c: &mut Criterion) {
    let registry = EntityStateRegistry::new();
    for entity in 0..10_000u32 {
        registry.set_assigned_slot(entity, (entity % 100) + 1);
    }

    let mut group = c.benchmark_group("registry");
    group.throughput(Throughput::Elements(1));
    group.bench_function("assigned_slot_10k_entities", |b| {
        let mut entity = 0u32;
        b.iter(|| {
            entity = (entity + 1) % 10_000;
            black_box(registry.assigned_slot(entity))
        });
    });
    group.finish();
}

fn benchmark_guard_toggle(c: &mut Criterion) {
    let registry = EntityStateRegistry::new();
    registry.set_assigned_slot(42, 7);

    c.bench_function("guard_enter_exit", |b| {
        b.iter(|| {
            black_box(registry.try_enter_change_guard(42));
            registry.exit_change_guard(42);
        });
    });
}

fn benchmark_index_assignment(c: &mut Criterion) {
    let table = PresetIdentityTable::new();
    for i in 0..1_000u32 {
        table.assign_index(&format!("Preset_{i}"), Category::Female);
    }

    c.bench_function("assign_index_existing_name", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 1) % 1_000;
            black_box(table.assign_index(&format!("Preset_{i}"), Category::Female))
        });
    });
}

criterion_group!(
    benches,
    benchmark_assigned_slot_lookup,
    benchmark_guard_toggle,
    benchmark_index_assignment
);
criterion_main!(benches);
