use std::sync::{mpsc, Arc};

use async_wars::config::DispatcherConfig;
use async_wars::dispatcher::TaskDispatcher;
use async_wars::fibonacci;
use async_wars::platform::Platform;
use async_wars::work::{ResultSink, WorkUnit};
use async_wars::ExecutionStrategy;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn criterion_benchmark(c: &mut Criterion) {
    let n = black_box(25);

    c.bench_function(format!("fibonacci_recursive {n}").as_str(), |b| {
        b.iter(|| fibonacci::fibonacci(n))
    });
    c.bench_function(format!("fibonacci_iterative {n}").as_str(), |b| {
        b.iter(|| fibonacci::fibonacci_iterative(n))
    });

    let platform = Arc::new(
        Platform::<u64>::start(DispatcherConfig::default()).expect("Starting platform failed"),
    );
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));

    // Round trip: dispatch, run fibonacci(n) off the UI thread, deliver on it.
    for strategy in ExecutionStrategy::ALL
        .into_iter()
        .filter(|s| !s.publishes())
    {
        c.bench_function(format!("round_trip_{strategy} fib({n})").as_str(), |b| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                dispatcher
                    .dispatch(
                        WorkUnit::new(move || Some(fibonacci::fibonacci(n))),
                        strategy,
                        ResultSink::new(move |outcome| {
                            tx.send(outcome).ok();
                        }),
                    )
                    .expect("Dispatch failed");
                rx.recv().expect("No result delivered")
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
