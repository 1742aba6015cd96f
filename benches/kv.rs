use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};

use depot::activity::MemoryActivityStore;
use depot::identity::{generate_session_token, KvSessionStore, SessionStore, UserId, DEFAULT_SESSION_TTL};
use depot::storage::{KvRead, KvStore};

fn gen_keys(n: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| format!("session:{:016x}", rng.gen::<u64>())).collect()
}

fn bench_kv(c: &mut Criterion) {
    let mut group = c.benchmark_group("kv_store");
    group.sample_size(20);

    for &n in &[10_000usize, 100_000usize] {
        let keys = gen_keys(n, 0xBEEF_CAFE);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("set_ttl", n), &keys, |b, keys| {
            b.iter(|| {
                let kv = KvStore::memory("bench");
                for k in keys {
                    let _ = kv.update(|tx| tx.set(k.as_str(), "v", Some(Duration::from_secs(60))));
                }
                criterion::black_box(kv.len());
            });
        });

        let kv = KvStore::memory("bench");
        for k in &keys {
            let _ = kv.update(|tx| tx.set(k.as_str(), "v", Some(Duration::from_secs(600))));
        }
        group.bench_with_input(BenchmarkId::new("get", n), &keys, |b, keys| {
            b.iter(|| {
                let mut hits = 0usize;
                for k in keys {
                    if kv.view(|tx| tx.get(k)).is_ok() { hits += 1; }
                }
                criterion::black_box(hits);
            });
        });
        group.bench_with_input(BenchmarkId::new("prefix_scan", n), &kv, |b, kv| {
            b.iter(|| {
                let mut seen = 0usize;
                kv.view(|tx| {
                    tx.ascend_prefix("session:", |_, _| { seen += 1; true });
                    Ok::<_, depot::storage::KvError>(())
                })
                .ok();
                criterion::black_box(seen);
            });
        });
    }
    group.finish();
}

fn bench_sessions(c: &mut Criterion) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => panic!("runtime: {e}"),
    };
    let mut group = c.benchmark_group("sessions");

    group.bench_function("generate_token", |b| b.iter(|| criterion::black_box(generate_session_token())));

    let store = KvSessionStore::new(KvStore::memory("sessions"), Arc::new(MemoryActivityStore::new()), DEFAULT_SESSION_TTL);
    group.bench_function("register_new", |b| {
        b.iter(|| rt.block_on(store.register_new(UserId(7), "10.0.0.1", "bench/1")))
    });

    let session = match rt.block_on(store.register_new(UserId(8), "10.0.0.1", "bench/1")) {
        Ok(s) => s,
        Err(e) => panic!("register: {e}"),
    };
    group.bench_function("acquire_and_refresh", |b| {
        b.iter(|| rt.block_on(store.acquire_and_refresh(&session.token, "10.0.0.1", "bench/1")))
    });
    group.finish();
}

criterion_group!(benches, bench_kv, bench_sessions);
criterion_main!(benches);
