//! # Anomaly Detector Benchmark
//!
//! The periodicity scan runs on every heartbeat (4 Hz per client). With a
//! full 60-sample window it must stay well under a microsecond-scale budget.
//!
//! Run with: `cargo bench --package shankpit_security`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use shankpit_security::{AnomalyDetector, MessageAuthenticator, SessionKey};

/// Benchmark: validate against a full window of human-like samples.
fn bench_validate_full_window(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let mut detector = AnomalyDetector::default();
    for _ in 0..60 {
        detector.validate(rng.gen_range(0.05..1.0), 0.01);
    }

    c.bench_function("validate_full_window", |b| {
        b.iter(|| detector.validate(black_box(rng.gen_range(0.05..1.0)), black_box(0.01)));
    });
}

/// Benchmark: HMAC verification of a heartbeat-sized body.
fn bench_verify_heartbeat(c: &mut Criterion) {
    let auth = MessageAuthenticator::new();
    let key = SessionKey::from_bytes([0x42; 32]);
    let body = [0xA5u8; 38];
    let tag = auth.sign(&body, &key);

    c.bench_function("verify_heartbeat_body", |b| {
        b.iter(|| auth.verify(black_box(&body), black_box(&tag), &key));
    });
}

criterion_group!(benches, bench_validate_full_window, bench_verify_heartbeat);
criterion_main!(benches);
