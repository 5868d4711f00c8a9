//! A single-value reactive pipeline.
//!
//! ```text
//! Single::from_work(work)
//!     .subscribe_on(runtime.handle().clone())  // where the work runs
//!     .observe_on(ui)                          // where the sink runs
//!     .subscribe(handle, &lifecycle, sink)     // -> Subscription
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tracing::debug;

use crate::error::DispatchError;
use crate::handle::DispatchHandle;
use crate::ui::{Lifecycle, UiHandle};
use crate::work::{ResultSink, WorkUnit};

/// Producer of exactly one optional value.
pub struct Single<T> {
    work: WorkUnit<T>,
}

impl<T: Send + 'static> Single<T> {
    pub fn from_work(work: WorkUnit<T>) -> Self {
        Self { work }
    }

    /// Runs the producer on `scheduler`'s blocking pool.
    pub fn subscribe_on(self, scheduler: Handle) -> ScheduledSingle<T> {
        ScheduledSingle {
            work: self.work,
            scheduler,
        }
    }
}

pub struct ScheduledSingle<T> {
    work: WorkUnit<T>,
    scheduler: Handle,
}

impl<T: Send + 'static> ScheduledSingle<T> {
    /// Observes the value on the UI loop.
    pub fn observe_on(self, ui: UiHandle) -> ObservedSingle<T> {
        ObservedSingle {
            work: self.work,
            scheduler: self.scheduler,
            ui,
        }
    }
}

pub struct ObservedSingle<T> {
    work: WorkUnit<T>,
    scheduler: Handle,
    ui: UiHandle,
}

impl<T: Send + 'static> ObservedSingle<T> {
    pub fn subscribe(
        self,
        handle: DispatchHandle,
        lifecycle: &Lifecycle,
        sink: ResultSink<T>,
    ) -> Subscription {
        let ObservedSingle {
            work,
            scheduler,
            ui,
        } = self;
        let lifecycle = lifecycle.clone();
        let task_handle = handle.clone();

        let task = scheduler.spawn(async move {
            let runner = task_handle.clone();
            let outcome = match tokio::task::spawn_blocking(move || {
                runner.mark_running().then(|| work.run())
            })
            .await
            {
                Ok(Some(outcome)) => outcome,
                Ok(None) => return,
                Err(e) => Err(DispatchError::from(e)),
            };
            ui.deliver(&lifecycle, task_handle, sink, outcome);
        });
        handle.set_abort(task.abort_handle());

        Subscription {
            handle,
            disposed: AtomicBool::new(false),
        }
    }
}

/// Disposable returned by [`ObservedSingle::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    handle: DispatchHandle,
    disposed: AtomicBool,
}

impl Subscription {
    /// Stops the pipeline. Safe to call any number of times.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(true) = self.handle.cancel() {
            debug!(dispatch_id = self.handle.id(), "subscription disposed before delivery");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn handle(&self) -> &DispatchHandle {
        &self.handle
    }
}
