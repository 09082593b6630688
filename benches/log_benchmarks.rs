//! Append and commit throughput for the operation log engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use opslog::{AccumulatorResource, LogStore, Operation, TransactionCoordinator};

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    let size = 256u64;
    group.throughput(Throughput::Elements(size));
    group.bench_function("memory_store_base_transaction", |b| {
        b.iter(|| {
            let coordinator = TransactionCoordinator::with_defaults(
                AccumulatorResource::new(),
                LogStore::memory(),
            );
            coordinator.start().unwrap();
            let tx = coordinator.begin_transaction().unwrap();
            for i in 0..size {
                tx.write(&Operation { description: None, payload: black_box(i as i32) }).unwrap();
            }
            tx.rollback().unwrap();
            coordinator.stop(std::time::Duration::from_millis(0)).unwrap();
        });
    });
    group.finish();
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    let size = 256u64;
    group.throughput(Throughput::Elements(size));
    group.bench_function("memory_store_base_transaction", |b| {
        b.iter(|| {
            let coordinator = TransactionCoordinator::with_defaults(
                AccumulatorResource::new(),
                LogStore::memory(),
            );
            coordinator.start().unwrap();
            let tx = coordinator.begin_transaction().unwrap();
            for i in 0..size {
                tx.write(&Operation { description: None, payload: black_box(i as i32) }).unwrap();
            }
            tx.commit().unwrap();
            coordinator.stop(std::time::Duration::from_millis(0)).unwrap();
        });
    });
    group.finish();
}

fn bench_nested_save_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_save_points");
    let depth = 32u64;
    group.throughput(Throughput::Elements(depth));
    group.bench_function("push_write_commit_chain", |b| {
        b.iter(|| {
            let coordinator = TransactionCoordinator::with_defaults(
                AccumulatorResource::new(),
                LogStore::memory(),
            );
            coordinator.start().unwrap();
            let mut txs = vec![coordinator.begin_transaction().unwrap()];
            for i in 0..depth {
                let parent = txs.last().unwrap();
                parent.write(&Operation { description: None, payload: black_box(i as i32) }).unwrap();
                txs.push(parent.begin_nested().unwrap());
            }
            while let Some(tx) = txs.pop() {
                tx.commit().unwrap();
            }
            coordinator.stop(std::time::Duration::from_millis(0)).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_append, bench_commit, bench_nested_save_points);
criterion_main!(benches);
