//! Per-screen dispatch of blocking work.
//!
//! [`TaskDispatcher`] runs a [`WorkUnit`] with the chosen
//! [`ExecutionStrategy`] and marshals the outcome back to the UI loop. It
//! owns every background resource it creates for its screen (worker loop,
//! pool, subscriptions, coroutine scope, threads) and releases them in
//! [`teardown`](TaskDispatcher::teardown).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use kanal::{bounded, Receiver};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::WorkerLoopDelivery;
use crate::error::{DispatchError, Outcome};
use crate::handle::DispatchHandle;
use crate::platform::Platform;
use crate::reactive::{Single, Subscription};
use crate::strategy::ExecutionStrategy;
use crate::ui::Lifecycle;
use crate::work::{ResultSink, WorkUnit};
use crate::worker_loop::WorkerLoop;

static NEXT_DISPATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A thread or pool job the dispatcher waits for at teardown. `done`
/// disconnects when the job's closure has been dropped.
struct Tracked {
    handle: DispatchHandle,
    done: Receiver<()>,
}

pub struct TaskDispatcher<T>
where
    T: Clone + Send + 'static,
{
    platform: Arc<Platform<T>>,
    lifecycle: Lifecycle,
    worker_loop: Option<WorkerLoop>,
    pool: Option<ThreadPool>,
    subscriptions: Vec<Subscription>,
    scope: JoinSet<()>,
    cancellable: Vec<DispatchHandle>,
    tracked: Vec<Tracked>,
}

impl<T> TaskDispatcher<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(platform: Arc<Platform<T>>) -> Self {
        Self {
            platform,
            lifecycle: Lifecycle::new(),
            worker_loop: None,
            pool: None,
            subscriptions: Vec::new(),
            scope: JoinSet::new(),
            cancellable: Vec::new(),
            tracked: Vec::new(),
        }
    }

    pub fn platform(&self) -> &Arc<Platform<T>> {
        &self.platform
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_destroyed()
    }

    pub fn has_worker_loop(&self) -> bool {
        self.worker_loop.is_some()
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    /// Runs `work` with `strategy` and returns without waiting for it,
    /// except for [`ExecutionStrategy::Blocking`], which runs the work on the
    /// calling thread and returns once the sink has run on the UI loop.
    ///
    /// `sink` is invoked at most once, on the UI loop. For
    /// [`ExecutionStrategy::BackgroundService`] (and the worker loop in
    /// broadcast mode) the outcome is published on the broadcaster instead
    /// and `sink` is dropped unused.
    pub fn dispatch(
        &mut self,
        work: WorkUnit<T>,
        strategy: ExecutionStrategy,
        sink: ResultSink<T>,
    ) -> Result<DispatchHandle, DispatchError> {
        if self.lifecycle.is_destroyed() {
            return Err(DispatchError::Destroyed);
        }
        self.reap();

        let handle = DispatchHandle::new(NEXT_DISPATCH_ID.fetch_add(1, Ordering::Relaxed), strategy);
        debug!(dispatch_id = handle.id(), strategy = %strategy, "dispatching work");

        match strategy {
            ExecutionStrategy::Blocking => self.run_inline(&handle, work, sink),
            ExecutionStrategy::DirectThread => self.spawn_thread("thread", &handle, work, sink)?,
            ExecutionStrategy::PostedToOwnedLoop => {
                self.spawn_thread("poster", &handle, work, sink)?
            }
            ExecutionStrategy::TaskAbstraction => self.spawn_task(&handle, work, sink),
            ExecutionStrategy::BackgroundService => {
                drop(sink);
                self.platform
                    .service()
                    .start_service(handle.clone(), work)?;
            }
            ExecutionStrategy::DedicatedWorkerLoop => {
                self.post_to_worker_loop(&handle, work, sink)?
            }
            ExecutionStrategy::SharedPool => self.submit_to_pool(&handle, work, sink)?,
            ExecutionStrategy::ReactivePipeline => {
                let subscription = Single::from_work(work)
                    .subscribe_on(self.platform.scheduler())
                    .observe_on(self.platform.ui())
                    .subscribe(handle.clone(), &self.lifecycle, sink);
                self.subscriptions.push(subscription);
            }
            ExecutionStrategy::Coroutine => self.launch(&handle, work, sink),
        }
        Ok(handle)
    }

    /// Runs `work` on the calling thread and returns its outcome. Whatever
    /// thread calls this is frozen until the work finishes.
    pub fn run_blocking(&self, work: WorkUnit<T>) -> Outcome<T> {
        debug!("running work on the calling thread");
        work.run()
    }

    fn run_inline(&self, handle: &DispatchHandle, work: WorkUnit<T>, sink: ResultSink<T>) {
        handle.mark_running();
        let outcome = work.run();
        self.platform
            .ui()
            .deliver_and_wait(&self.lifecycle, handle.clone(), sink, outcome);
    }

    fn spawn_thread(
        &mut self,
        prefix: &str,
        handle: &DispatchHandle,
        work: WorkUnit<T>,
        sink: ResultSink<T>,
    ) -> Result<(), DispatchError> {
        let (done_tx, done) = bounded::<()>(1);
        let job = self.delivering_job(handle, work, sink);
        thread::Builder::new()
            .name(format!("{prefix}-{}", handle.id()))
            .spawn(move || {
                let _done = done_tx;
                job();
            })
            .map_err(|e| DispatchError::unavailable("thread", e))?;
        self.tracked.push(Tracked {
            handle: handle.clone(),
            done,
        });
        Ok(())
    }

    fn spawn_task(&mut self, handle: &DispatchHandle, work: WorkUnit<T>, sink: ResultSink<T>) {
        let ui = self.platform.ui();
        let lifecycle = self.lifecycle.clone();
        let task = handle.clone();
        let join = self.platform.scheduler().spawn_blocking(move || {
            if !task.mark_running() {
                return;
            }
            let outcome = work.run();
            ui.deliver(&lifecycle, task, sink, outcome);
        });
        handle.set_abort(join.abort_handle());
        self.cancellable.push(handle.clone());
    }

    fn post_to_worker_loop(
        &mut self,
        handle: &DispatchHandle,
        work: WorkUnit<T>,
        sink: ResultSink<T>,
    ) -> Result<(), DispatchError> {
        let config = self.platform.config();
        let worker = match self.worker_loop.take() {
            Some(worker) => worker,
            None => WorkerLoop::start(&config.worker_loop_name)?,
        };
        let job: Box<dyn FnOnce() + Send> = match config.worker_loop_delivery {
            WorkerLoopDelivery::Ui => Box::new(self.delivering_job(handle, work, sink)),
            WorkerLoopDelivery::Broadcast => {
                drop(sink);
                let broadcaster = Arc::clone(self.platform.broadcaster());
                let action = config.broadcast_action.clone();
                let task = handle.clone();
                Box::new(move || {
                    task.mark_running();
                    let outcome = work.run();
                    task.mark_delivered();
                    broadcaster.send(&action, outcome);
                })
            }
        };
        let worker = self.worker_loop.insert(worker);
        worker.post(handle.clone(), job)
    }

    fn submit_to_pool(
        &mut self,
        handle: &DispatchHandle,
        work: WorkUnit<T>,
        sink: ResultSink<T>,
    ) -> Result<(), DispatchError> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                let size = self.platform.config().pool_size;
                info!(size, "creating worker pool");
                ThreadPoolBuilder::new()
                    .num_threads(size)
                    .thread_name(|i| format!("pool-worker-{i}"))
                    .build()?
            }
        };
        let (done_tx, done) = bounded::<()>(1);
        let job = self.delivering_job(handle, work, sink);
        self.pool.insert(pool).spawn(move || {
            let _done = done_tx;
            job();
        });
        self.tracked.push(Tracked {
            handle: handle.clone(),
            done,
        });
        Ok(())
    }

    fn launch(&mut self, handle: &DispatchHandle, work: WorkUnit<T>, sink: ResultSink<T>) {
        let ui = self.platform.ui();
        let lifecycle = self.lifecycle.clone();
        let task = handle.clone();
        let abort = self.scope.spawn_on(
            async move {
                let runner = task.clone();
                let outcome = match tokio::task::spawn_blocking(move || {
                    runner.mark_running().then(|| work.run())
                })
                .await
                {
                    Ok(Some(outcome)) => outcome,
                    // Cancelled before the blocking thread picked it up.
                    Ok(None) => return,
                    Err(e) => Err(DispatchError::from(e)),
                };
                ui.deliver(&lifecycle, task, sink, outcome);
            },
            &self.platform.scheduler(),
        );
        handle.set_abort(abort);
        self.cancellable.push(handle.clone());
    }

    /// Job body shared by the thread-like strategies: run, then marshal.
    fn delivering_job(
        &self,
        handle: &DispatchHandle,
        work: WorkUnit<T>,
        sink: ResultSink<T>,
    ) -> impl FnOnce() + Send + 'static {
        let ui = self.platform.ui();
        let lifecycle = self.lifecycle.clone();
        let task = handle.clone();
        move || {
            task.mark_running();
            let outcome = work.run();
            ui.deliver(&lifecycle, task, sink, outcome);
        }
    }

    /// Forgets bookkeeping for dispatches that already finished.
    fn reap(&mut self) {
        self.tracked.retain(|t| !t.handle.is_terminal());
        self.cancellable.retain(|h| !h.is_terminal());
        self.subscriptions.retain(|s| !s.handle().is_terminal());
        while self.scope.try_join_next().is_some() {}
    }

    /// Releases every resource owned for this screen. Results that arrive
    /// afterwards are dropped. Calling it again is a no-op.
    pub fn teardown(&mut self) {
        if !self.lifecycle.destroy() {
            return;
        }
        let join = self.platform.config().join_on_teardown;

        for handle in self.cancellable.drain(..) {
            if let Err(err) = handle.cancel() {
                warn!(dispatch_id = handle.id(), error = %err, "cancel failed during teardown");
            }
        }
        for subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
        self.scope.abort_all();

        if let Some(mut worker) = self.worker_loop.take() {
            worker.quit();
            if join {
                worker.join();
            }
        }

        let mut leaked = 0usize;
        for tracked in self.tracked.drain(..) {
            if join {
                // Disconnects once the job has finished.
                tracked.done.recv().ok();
            } else if tracked.handle.mark_leaked() {
                warn!(dispatch_id = tracked.handle.id(), strategy = %tracked.handle.strategy(), "work left running after teardown");
                leaked += 1;
            }
        }
        // Threads exit once their queued jobs finish.
        drop(self.pool.take());

        if let Err(err) = self.platform.ui().sync() {
            debug!(error = %err, "UI loop gone during teardown");
        }
        info!(leaked, "dispatcher torn down");
    }
}

impl<T> Drop for TaskDispatcher<T>
where
    T: Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
