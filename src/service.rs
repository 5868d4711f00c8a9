use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::error::{DispatchError, Outcome};
use crate::handle::DispatchHandle;
use crate::work::WorkUnit;

struct Intent<T> {
    handle: DispatchHandle,
    work: WorkUnit<T>,
}

struct ServiceState<T> {
    pending: VecDeque<Intent<T>>,
    running: bool,
}

/// Screen-independent worker that handles queued intents one at a time and
/// publishes every outcome on the broadcaster.
///
/// The service thread is started on demand and exits as soon as the queue is
/// empty, so an idle service holds no thread.
pub struct BackgroundService<T> {
    name: String,
    action: String,
    broadcaster: Arc<Broadcaster<Outcome<T>>>,
    state: Arc<Mutex<ServiceState<T>>>,
}

impl<T> BackgroundService<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        action: impl Into<String>,
        broadcaster: Arc<Broadcaster<Outcome<T>>>,
    ) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            broadcaster,
            state: Arc::new(Mutex::new(ServiceState {
                pending: VecDeque::new(),
                running: false,
            })),
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// Queues `work`. Spawns the service thread if it is not running.
    pub fn start_service(
        &self,
        handle: DispatchHandle,
        work: WorkUnit<T>,
    ) -> Result<(), DispatchError> {
        let mut state = lock(&self.state);
        state.pending.push_back(Intent { handle, work });
        if state.running {
            return Ok(());
        }

        let shared = Arc::clone(&self.state);
        let broadcaster = Arc::clone(&self.broadcaster);
        let action = self.action.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || handle_intents(shared, broadcaster, action));

        match spawned {
            Ok(_) => {
                state.running = true;
                info!(service = %self.name, "background service started");
                Ok(())
            }
            Err(e) => {
                state.pending.pop_back();
                Err(DispatchError::unavailable("background service thread", e))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).pending.len()
    }
}

fn handle_intents<T: Clone + Send + 'static>(
    state: Arc<Mutex<ServiceState<T>>>,
    broadcaster: Arc<Broadcaster<Outcome<T>>>,
    action: String,
) {
    loop {
        let next = {
            let mut state = lock(&state);
            let next = state.pending.pop_front();
            if next.is_none() {
                state.running = false;
            }
            next
        };
        let Some(Intent { handle, work }) = next else {
            debug!(action = %action, "background service idle, stopping");
            return;
        };

        handle.mark_running();
        let outcome = work.run();
        if let Err(err) = &outcome {
            warn!(dispatch_id = handle.id(), error = %err, "background work failed");
        }
        handle.mark_delivered();
        let reached = broadcaster.send(&action, outcome);
        debug!(dispatch_id = handle.id(), action = %action, reached, "result broadcast");
    }
}

fn lock<T>(state: &Mutex<ServiceState<T>>) -> MutexGuard<'_, ServiceState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleState;
    use crate::strategy::ExecutionStrategy;
    use crate::broadcast::DEFAULT_CAPACITY;
    use std::sync::mpsc;
    use std::time::Duration;
    use tokio::runtime::{Builder, Runtime};

    type Bus = Arc<Broadcaster<Outcome<u32>>>;

    fn service() -> (BackgroundService<u32>, Bus, Runtime) {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let bus = Arc::new(Broadcaster::new(runtime.handle().clone(), DEFAULT_CAPACITY));
        (
            BackgroundService::new("service-test", "numbers", bus.clone()),
            bus,
            runtime,
        )
    }

    #[test]
    fn intents_are_handled_in_order_and_broadcast() {
        let (service, bus, _runtime) = service();
        let (tx, rx) = mpsc::channel();
        bus.register("numbers", move |outcome| {
            tx.send(outcome).ok();
        });

        let handles: Vec<_> = (0..3)
            .map(|i| {
                let handle = DispatchHandle::new(i, ExecutionStrategy::BackgroundService);
                service
                    .start_service(handle.clone(), WorkUnit::new(move || Some(i as u32)))
                    .unwrap();
                handle
            })
            .collect();

        let got: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(got, vec![Ok(Some(0)), Ok(Some(1)), Ok(Some(2))]);
        for handle in handles {
            assert_eq!(handle.state(), HandleState::Delivered);
        }
    }

    #[test]
    fn fault_is_published_not_raised() {
        let (service, bus, _runtime) = service();
        let (tx, rx) = mpsc::channel();
        bus.register("numbers", move |outcome| {
            tx.send(outcome).ok();
        });

        let handle = DispatchHandle::new(1, ExecutionStrategy::BackgroundService);
        service
            .start_service(handle, WorkUnit::new(|| panic!("no network")))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Err(DispatchError::WorkUnitFault("no network".to_string()))
        );
    }

    #[test]
    fn service_stops_when_idle() {
        let (service, _bus, _runtime) = service();
        let handle = DispatchHandle::new(1, ExecutionStrategy::BackgroundService);
        service
            .start_service(handle.clone(), WorkUnit::new(|| Some(1)))
            .unwrap();

        for _ in 0..200 {
            if !service.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!service.is_running());
        assert_eq!(service.pending(), 0);
        assert_eq!(handle.state(), HandleState::Delivered);
    }
}
