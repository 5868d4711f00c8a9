use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use kanal::{unbounded, Receiver, Sender};
use tracing::{debug, error, info};

use crate::error::DispatchError;
use crate::handle::DispatchHandle;
use crate::work::panic_message;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum LoopMessage {
    Run { handle: DispatchHandle, job: Job },
    Quit,
}

#[derive(Default)]
struct Flags {
    /// No new messages are accepted.
    quitting: AtomicBool,
    /// Queued messages that have not started are dropped.
    discard: AtomicBool,
}

/// Long-lived worker thread with its own message queue.
///
/// Started once and reused for every queued job until [`quit`](Self::quit)
/// or [`quit_safely`](Self::quit_safely).
pub struct WorkerLoop {
    name: String,
    sender: Sender<LoopMessage>,
    flags: Arc<Flags>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerLoop {
    pub fn start(name: &str) -> Result<Self, DispatchError> {
        let (sender, receiver) = unbounded::<LoopMessage>();
        let flags = Arc::new(Flags::default());
        let loop_flags = Arc::clone(&flags);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(receiver, loop_flags))
            .map_err(|e| DispatchError::unavailable("worker loop", e))?;
        info!(name, "worker loop started");
        Ok(Self {
            name: name.to_string(),
            sender,
            flags,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `job`. Fails with [`DispatchError::Destroyed`] once the loop
    /// has been asked to quit.
    pub fn post<F>(&self, handle: DispatchHandle, job: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.flags.quitting.load(Ordering::Acquire) {
            return Err(DispatchError::Destroyed);
        }
        self.sender
            .send(LoopMessage::Run {
                handle,
                job: Box::new(job),
            })
            .map_err(|_| DispatchError::Destroyed)
    }

    /// Stops the loop. Queued jobs that have not started are dropped and
    /// their handles cancelled; a job already running finishes.
    ///
    /// Returns `false` if the loop was already quitting.
    pub fn quit(&self) -> bool {
        self.flags.discard.store(true, Ordering::Release);
        self.request_quit()
    }

    /// Stops accepting work, runs everything already queued, then exits.
    pub fn quit_safely(&self) -> bool {
        self.request_quit()
    }

    fn request_quit(&self) -> bool {
        if self.flags.quitting.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sender.send(LoopMessage::Quit).ok();
        debug!(name = %self.name, "worker loop quit requested");
        true
    }

    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Waits for the loop thread to exit. Only meaningful after a quit.
    pub fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(name = %self.name, "worker loop thread panicked");
            }
        }
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        // Dropping without joining detaches the thread; it still exits.
        self.quit();
    }
}

fn run_loop(receiver: Receiver<LoopMessage>, flags: Arc<Flags>) {
    while let Ok(message) = receiver.recv() {
        match message {
            LoopMessage::Run { handle, job } => {
                if flags.discard.load(Ordering::Acquire) {
                    if handle.mark_cancelled() {
                        debug!(dispatch_id = handle.id(), "queued work dropped by quit");
                    }
                    continue;
                }
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(dispatch_id = handle.id(), reason = %panic_message(payload.as_ref()), "worker loop job panicked");
                }
            }
            LoopMessage::Quit => break,
        }
    }
    let _ = receiver.close();
    debug!("worker loop stopped");
}
