use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use async_wars::config::DispatcherConfig;
use async_wars::dispatcher::TaskDispatcher;
use async_wars::fibonacci::fibonacci;
use async_wars::handle::HandleState;
use async_wars::platform::Platform;
use async_wars::work::{Image, ResultSink, WorkUnit};
use async_wars::{ExecutionStrategy, Outcome};

const WAIT: Duration = Duration::from_secs(5);

fn platform() -> Arc<Platform<Image>> {
    Arc::new(Platform::start(DispatcherConfig::default()).unwrap())
}

#[test]
fn dispatch_returns_before_work_completes() {
    let platform = platform();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));
    let (tx, rx) = mpsc::channel::<Outcome<Image>>();
    let mut gates = Vec::new();

    for strategy in ExecutionStrategy::ALL
        .into_iter()
        .filter(|s| *s != ExecutionStrategy::Blocking)
    {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let tx = tx.clone();
        dispatcher
            .dispatch(
                WorkUnit::new(move || {
                    gate_rx.recv().ok();
                    Some(Image::new("gated"))
                }),
                strategy,
                ResultSink::new(move |outcome| {
                    tx.send(outcome).ok();
                }),
            )
            .unwrap();
        // Getting here at all means dispatch did not wait on the gate.
        gates.push(gate_tx);
    }
    assert!(rx.try_recv().is_err());

    for gate in gates {
        gate.send(()).ok();
    }
    // Every strategy that delivers to the sink: all except the service.
    for _ in 0..7 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Some(Image::new("gated"))));
    }
}

#[test]
fn task_abstraction_delivers_image_a_once_on_ui_thread() {
    let platform = platform();
    let ui = platform.ui();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));
    let (tx, rx) = mpsc::channel();

    let handle = dispatcher
        .dispatch(
            WorkUnit::new(|| Some(Image::new("A"))),
            ExecutionStrategy::TaskAbstraction,
            ResultSink::new(move |outcome| {
                tx.send((outcome, ui.is_ui_thread())).ok();
            }),
        )
        .unwrap();

    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (Ok(Some(Image::new("A"))), true)
    );
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    assert_eq!(handle.state(), HandleState::Delivered);
}

#[test]
fn shared_pool_never_exceeds_four_concurrent_units() {
    let platform = platform();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    for i in 0..5 {
        let (active, peak, tx) = (active.clone(), peak.clone(), tx.clone());
        dispatcher
            .dispatch(
                WorkUnit::new(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Some(Image::new(format!("pool-{i}")))
                }),
                ExecutionStrategy::SharedPool,
                ResultSink::new(move |outcome| {
                    tx.send(outcome).ok();
                }),
            )
            .unwrap();
    }

    let mut ids: Vec<String> = (0..5)
        .map(|_| rx.recv_timeout(WAIT).unwrap().unwrap().unwrap().id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["pool-0", "pool-1", "pool-2", "pool-3", "pool-4"]);
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[test]
fn worker_loop_teardown_twice_is_harmless() {
    let platform = platform();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    dispatcher
        .dispatch(
            WorkUnit::new(|| Some(Image::new("loop"))),
            ExecutionStrategy::DedicatedWorkerLoop,
            ResultSink::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    dispatcher.teardown();
    let after_first = calls.load(Ordering::SeqCst);
    dispatcher.teardown();
    platform.ui().sync().unwrap();
    assert!(after_first <= 1);
    assert_eq!(calls.load(Ordering::SeqCst), after_first);
}

#[test]
fn worker_loop_teardown_mid_flight_never_delivers_late() {
    let platform = platform();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let handle = dispatcher
        .dispatch(
            WorkUnit::new(|| {
                thread::sleep(Duration::from_millis(30));
                Some(Image::new("slow"))
            }),
            ExecutionStrategy::DedicatedWorkerLoop,
            ResultSink::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    dispatcher.teardown();
    let at_teardown = calls.load(Ordering::SeqCst);
    assert!(at_teardown <= 1);

    thread::sleep(Duration::from_millis(80));
    platform.ui().sync().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), at_teardown);
    assert!(handle.is_terminal());
}

#[test]
fn broadcast_without_listener_is_not_replayed() {
    let platform = platform();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));

    dispatcher
        .dispatch(
            WorkUnit::new(|| Some(Image::new("unheard"))),
            ExecutionStrategy::BackgroundService,
            ResultSink::discard(),
        )
        .unwrap();
    let deadline = Instant::now() + WAIT;
    while platform.service().is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(!platform.service().is_running());

    let (tx, rx) = mpsc::channel();
    platform
        .broadcaster()
        .register("image.downloaded", move |outcome| {
            tx.send(outcome).ok();
        });
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn background_service_outlives_the_dispatching_screen() {
    let platform = platform();
    let (tx, rx) = mpsc::channel();
    platform
        .broadcaster()
        .register("image.downloaded", move |outcome| {
            tx.send(outcome).ok();
        });
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));
    let handle = dispatcher
        .dispatch(
            WorkUnit::new(move || {
                gate_rx.recv().ok();
                Some(Image::new("survivor"))
            }),
            ExecutionStrategy::BackgroundService,
            ResultSink::discard(),
        )
        .unwrap();
    drop(dispatcher);

    gate_tx.send(()).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Ok(Some(Image::new("survivor"))));
    assert_eq!(handle.state(), HandleState::Delivered);
}

#[test]
fn blocking_fibonacci_of_ten_is_55() {
    let platform = platform();
    let ui = platform.ui();
    let mut dispatcher = TaskDispatcher::new(Arc::clone(&platform));

    let caller = thread::current().id();
    let (tx, rx) = mpsc::channel();
    let handle = dispatcher
        .dispatch(
            WorkUnit::new(move || {
                assert_eq!(thread::current().id(), caller);
                Some(Image::new(fibonacci(10).to_string()))
            }),
            ExecutionStrategy::Blocking,
            ResultSink::new(move |outcome| {
                tx.send((outcome, ui.is_ui_thread())).ok();
            }),
        )
        .unwrap();
    // Already delivered, on the UI loop, when dispatch returns.
    assert_eq!(handle.state(), HandleState::Delivered);
    assert_eq!(rx.try_recv().unwrap(), (Ok(Some(Image::new("55"))), true));

    let numeric = TaskDispatcher::new(Arc::new(
        Platform::<u64>::start(DispatcherConfig::default()).unwrap(),
    ));
    assert_eq!(numeric.run_blocking(WorkUnit::new(|| Some(fibonacci(10)))), Ok(Some(55)));
}
