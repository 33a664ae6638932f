//! Benchmarks for the CosmicCipher engine
//!
//! Mirrors the demo harness: user creation, export/import, instance exchange,
//! the two-phase handshake and one message each way.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use cosmiccipher_core::{Engine, EngineConfig};

fn engine() -> Engine {
    Engine::new(EngineConfig::insecure_fast()).unwrap()
}

fn connected() -> Engine {
    let engine = engine();
    engine.new_user("alice").unwrap();
    engine.new_user("bob").unwrap();
    let to_bob = engine.init_dh_kex("alice", "bob").unwrap();
    let to_alice = engine.init_dh_kex("bob", "alice").unwrap();
    engine.finalize_dh_kex("alice", "bob", &to_alice).unwrap();
    engine.finalize_dh_kex("bob", "alice", &to_bob).unwrap();
    engine
}

fn bench_identity(c: &mut Criterion) {
    let mut group = c.benchmark_group("Identity");

    group.bench_function("new_user", |b| {
        b.iter_batched(
            engine,
            |engine| engine.new_user(black_box("bob")).unwrap(),
            BatchSize::SmallInput,
        )
    });

    let exporter = engine();
    exporter.new_user("bob").unwrap();
    group.bench_function("export_user", |b| {
        b.iter(|| black_box(exporter.export_user("bob", "test").unwrap()))
    });

    let blob = exporter.export_user("bob", "test").unwrap();
    group.bench_function("import_user", |b| {
        b.iter_batched(
            engine,
            |engine| engine.import_user("bob", "test", black_box(&blob)).unwrap(),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_instance(c: &mut Criterion) {
    let mut group = c.benchmark_group("Instance");

    let engine = engine();
    engine.new_user("alice").unwrap();
    engine.new_user("bob").unwrap();

    group.bench_function("generate_instance", |b| {
        b.iter(|| black_box(engine.generate_instance("bob").unwrap()))
    });

    let instance = engine.generate_instance("bob").unwrap();
    group.bench_function("import_instance", |b| {
        b.iter(|| engine.import_instance("alice", black_box(&instance)).unwrap())
    });

    group.finish();
}

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("DH-KEX");

    let engine = engine();
    engine.new_user("alice").unwrap();
    engine.new_user("bob").unwrap();

    // A pending attempt refuses a second init, so each round resets first
    group.bench_function("init_dh_kex", |b| {
        b.iter(|| {
            engine.reset_session("alice", "bob").unwrap();
            black_box(engine.init_dh_kex("alice", "bob").unwrap())
        })
    });

    group.bench_function("init_and_finalize_pair", |b| {
        b.iter(|| {
            engine.reset_session("alice", "bob").unwrap();
            let to_bob = engine.init_dh_kex("alice", "bob").unwrap();
            let to_alice = engine.init_dh_kex("bob", "alice").unwrap();
            engine.finalize_dh_kex("alice", "bob", &to_alice).unwrap();
            engine.finalize_dh_kex("bob", "alice", &to_bob).unwrap();
        })
    });

    group.finish();
}

fn bench_session(c: &mut Criterion) {
    let mut group = c.benchmark_group("Session");

    let engine = connected();
    let message = b"Hello Alice!";

    group.bench_function("encrypt", |b| {
        b.iter(|| black_box(engine.encrypt("bob", "alice", black_box(message)).unwrap()))
    });

    group.bench_function("encrypt_decrypt", |b| {
        b.iter(|| {
            let ciphertext = engine.encrypt("bob", "alice", message).unwrap();
            black_box(engine.decrypt("alice", "bob", &ciphertext).unwrap())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_identity, bench_instance, bench_handshake, bench_session);
criterion_main!(benches);
