use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use haplog_ha::{ConfirmOffsetTracker, IsrRegistry};
use std::sync::Arc;
use tempfile::TempDir;

fn benchmark_epoch_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("epoch_append");

    group.bench_function("append_fsync", |b| {
        let dir = TempDir::new().unwrap();
        let cache = haplog_ha::EpochCache::load(dir.path().join("epoch.dat")).unwrap();
        let mut epoch = 0u32;
        b.iter(|| {
            epoch += 1;
            cache.append(epoch, epoch as u64 * 100).unwrap();
        });
    });

    group.finish();
}

fn benchmark_isr_expand_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("isr_reconfigure");

    group.bench_function("propose_then_commit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let isr = IsrRegistry::new(5_000);
                isr.propose_add("follower-1".to_string());
                let committed = isr.commit(isr.effective());
                black_box(committed);
            });
        });
    });

    group.finish();
}

fn benchmark_confirm_offset_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("confirm_offset");

    for replicas in [1usize, 3, 8].iter() {
        group.throughput(Throughput::Elements(*replicas as u64));
        group.bench_with_input(BenchmarkId::from_parameter(replicas), replicas, |b, &replicas| {
            let isr = IsrRegistry::new(5_000);
            let channels = haplog_ha::ChannelSupervisor::new();
            for i in 0..replicas {
                let follower = format!("f{i}");
                isr.propose_add(follower.clone());
                isr.commit(isr.effective());
                channels.register(Arc::new(haplog_ha::InMemoryFollowerChannel::new(follower, format!("c{i}"))));
            }
            let tracker = ConfirmOffsetTracker::new();

            b.iter(|| {
                black_box(tracker.get(&isr, &channels, 1_000_000));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_epoch_append, benchmark_isr_expand_commit, benchmark_confirm_offset_compute);
criterion_main!(benches);
