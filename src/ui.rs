//! The single UI context.
//!
//! [`UiLoop`] owns a dedicated thread draining a `kanal` queue of closures.
//! Everything that touches screen state is posted through a [`UiHandle`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use kanal::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::{DispatchError, Outcome};
use crate::handle::DispatchHandle;
use crate::work::{panic_message, ResultSink};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum UiMessage {
    Run(Job),
    Quit,
}

/// Cloneable sender side of the UI loop.
#[derive(Clone)]
pub struct UiHandle {
    sender: Sender<UiMessage>,
    thread_id: ThreadId,
}

impl UiHandle {
    /// Queues `f` to run on the UI thread.
    pub fn post<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender
            .send(UiMessage::Run(Box::new(f)))
            .map_err(|_| DispatchError::UiClosed)
    }

    /// Runs `f` on the UI thread and waits for its result.
    pub fn invoke<F, R>(&self, f: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_ui_thread() {
            return Ok(f());
        }
        let (tx, rx) = bounded::<R>(1);
        self.post(move || {
            tx.send(f()).ok();
        })?;
        rx.recv().map_err(|_| DispatchError::UiClosed)
    }

    /// Returns once everything posted before this call has run.
    pub fn sync(&self) -> Result<(), DispatchError> {
        self.invoke(|| ())
    }

    pub fn is_ui_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Marshals a finished dispatch onto the UI thread.
    ///
    /// The sink runs only if the screen is still alive and the handle has not
    /// reached a terminal state; otherwise the result is dropped.
    pub(crate) fn deliver<T>(
        &self,
        lifecycle: &Lifecycle,
        handle: DispatchHandle,
        sink: ResultSink<T>,
        outcome: Outcome<T>,
    ) where
        T: Send + 'static,
    {
        let dispatch_id = handle.id();
        if self.post(delivery(lifecycle, handle, sink, outcome)).is_err() {
            warn!(dispatch_id, "UI loop closed, result dropped");
        }
    }

    /// Like [`deliver`](Self::deliver), but waits until the sink has run.
    /// Runs inline when called on the UI thread.
    pub(crate) fn deliver_and_wait<T>(
        &self,
        lifecycle: &Lifecycle,
        handle: DispatchHandle,
        sink: ResultSink<T>,
        outcome: Outcome<T>,
    ) where
        T: Send + 'static,
    {
        let dispatch_id = handle.id();
        if self.invoke(delivery(lifecycle, handle, sink, outcome)).is_err() {
            warn!(dispatch_id, "UI loop closed, result dropped");
        }
    }
}

fn delivery<T>(
    lifecycle: &Lifecycle,
    handle: DispatchHandle,
    sink: ResultSink<T>,
    outcome: Outcome<T>,
) -> impl FnOnce() + Send + 'static
where
    T: Send + 'static,
{
    let lifecycle = lifecycle.clone();
    move || {
        let dispatch_id = handle.id();
        if lifecycle.is_destroyed() {
            if handle.mark_cancelled() {
                debug!(dispatch_id, strategy = %handle.strategy(), "screen destroyed, result dropped");
            }
            return;
        }
        if handle.mark_delivered() {
            debug!(dispatch_id, strategy = %handle.strategy(), "delivering result");
            sink.invoke(outcome);
        } else {
            debug!(dispatch_id, state = ?handle.state(), "dispatch already finished, result dropped");
        }
    }
}

/// The UI thread and its queue.
pub struct UiLoop {
    handle: UiHandle,
    thread: Option<JoinHandle<()>>,
}

impl UiLoop {
    pub fn start(name: &str) -> Result<Self, DispatchError> {
        let (sender, receiver) = unbounded::<UiMessage>();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(receiver))
            .map_err(|e| DispatchError::unavailable("UI thread", e))?;
        let handle = UiHandle {
            sender,
            thread_id: thread.thread().id(),
        };
        debug!(name, "UI loop started");
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    /// Runs everything already queued, then stops the thread. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.handle.sender.send(UiMessage::Quit).ok();
        if self.handle.is_ui_thread() {
            // Shutting down from inside a UI callback: the loop exits after
            // this job returns, joining here would deadlock.
            return;
        }
        if thread.join().is_err() {
            error!("UI thread panicked during shutdown");
        }
        debug!("UI loop stopped");
    }
}

impl Drop for UiLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(receiver: Receiver<UiMessage>) {
    while let Ok(message) = receiver.recv() {
        match message {
            UiMessage::Run(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(reason = %panic_message(payload.as_ref()), "UI callback panicked");
                }
            }
            UiMessage::Quit => break,
        }
    }
    // Drops anything posted after the quit so waiters observe a closed loop.
    let _ = receiver.close();
}

/// Liveness of the screen that owns a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    destroyed: Arc<AtomicBool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that performed the transition.
    pub fn destroy(&self) -> bool {
        !self.destroyed.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleState;
    use crate::strategy::ExecutionStrategy;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn posted_closures_run_on_the_ui_thread_in_order() {
        let ui = UiLoop::start("ui-test").unwrap();
        let handle = ui.handle();
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            let h = handle.clone();
            handle
                .post(move || {
                    tx.send((i, h.is_ui_thread())).unwrap();
                })
                .unwrap();
        }
        let seen: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(seen, vec![(0, true), (1, true), (2, true)]);
        assert!(!handle.is_ui_thread());
    }

    #[test]
    fn invoke_returns_value() {
        let ui = UiLoop::start("ui-invoke").unwrap();
        let id = ui.handle().invoke(|| thread::current().id()).unwrap();
        assert_eq!(id, ui.handle().thread_id());
    }

    #[test]
    fn panicking_callback_does_not_kill_loop() {
        let ui = UiLoop::start("ui-panic").unwrap();
        ui.handle().post(|| panic!("bad callback")).unwrap();
        assert_eq!(ui.handle().invoke(|| 7).unwrap(), 7);
    }

    #[test]
    fn post_after_shutdown_reports_closed() {
        let mut ui = UiLoop::start("ui-closed").unwrap();
        let handle = ui.handle();
        ui.shutdown();
        ui.shutdown();
        assert_eq!(handle.post(|| {}), Err(DispatchError::UiClosed));
    }

    #[test]
    fn delivery_is_dropped_for_destroyed_screen() {
        let ui = UiLoop::start("ui-deliver").unwrap();
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.destroy());
        assert!(!lifecycle.destroy());

        let handle = DispatchHandle::new(1, ExecutionStrategy::DirectThread);
        let (tx, rx) = mpsc::channel::<Outcome<u32>>();
        ui.handle().deliver(
            &lifecycle,
            handle.clone(),
            ResultSink::new(move |o| tx.send(o).unwrap()),
            Ok(Some(1)),
        );
        ui.handle().sync().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(handle.state(), HandleState::Cancelled);
    }
}
