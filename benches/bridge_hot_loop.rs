use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::cell::RefCell;
use std::hint::black_box;
use std::rc::Rc;
use std::time::{Duration, Instant};

use loopmq::bridge::SocketAdapter;
use loopmq::event_loop::EventLoop;
use loopmq::message::Message;
use loopmq::transport::{MemSocket, SocketKind, TransportSocket};

/// Push `total_msgs` through one adapter's drain path and time the loop side.
/// The sender is a raw endpoint on the same thread, refilled between cycles,
/// so the measurement covers the pre-block poll, the forced wakes, and the
/// drain itself rather than cross-thread scheduling noise.
fn run_drain_loop(total_msgs: u64, batch: usize) -> Duration {
    let (mut tx, rx) =
        MemSocket::pair_with_capacity(SocketKind::Push, SocketKind::Pull, batch.max(64)).unwrap();

    let mut el = EventLoop::new().unwrap();
    let handle = el.handle();
    let adapter = SocketAdapter::create(rx, &handle).unwrap();
    adapter.set_max_drain_batch(batch);

    let seen = Rc::new(RefCell::new(0u64));
    {
        let seen = seen.clone();
        adapter.on_message(move |m| {
            black_box(m.len());
            *seen.borrow_mut() += 1;
        });
    }

    let payload = Message::with_size(32);
    let mut queued = 0u64;
    let start = Instant::now();
    while *seen.borrow() < total_msgs {
        while queued < total_msgs && tx.send(&payload).is_ok() {
            queued += 1;
        }
        el.dispatch(Some(Duration::from_millis(10))).unwrap();
    }
    start.elapsed()
}

pub fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_drain_loop");

    for &batch in &[100_usize, 1_000_usize] {
        group.bench_function(BenchmarkId::from_parameter(batch), |b| {
            b.iter_custom(|n| {
                let mut total = Duration::ZERO;
                for _ in 0..n {
                    total += run_drain_loop(200_000, batch);
                }
                total
            });
        });
    }

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(10);
    targets = bench_drain
}
criterion_main!(benches);
