//! The demo screen: a status line, an image slot and a download button.
//!
//! Screen state lives behind a mutex but is only written from closures
//! running on the UI loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use crate::broadcast::ListenerId;
use crate::dispatcher::TaskDispatcher;
use crate::downloader::{download_work, ImageSource};
use crate::error::{DispatchError, Outcome};
use crate::fibonacci::fibonacci;
use crate::handle::DispatchHandle;
use crate::platform::Platform;
use crate::strategy::ExecutionStrategy;
use crate::ui::{Lifecycle, UiHandle};
use crate::work::{Image, ResultSink, WorkUnit};

/// What the user sees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UiState {
    pub image: Option<Image>,
    pub status_text: String,
    pub toast: Option<String>,
    /// Number of times an outcome reached the screen.
    pub deliveries: usize,
}

impl UiState {
    pub fn set_image(&mut self, image: Option<Image>) {
        self.image = image;
    }

    pub fn set_status_text(&mut self, text: impl Into<String>) {
        self.status_text = text.into();
    }

    pub fn show_toast(&mut self, text: impl Into<String>) {
        self.toast = Some(text.into());
    }

    fn apply(&mut self, outcome: Outcome<Image>) {
        self.deliveries += 1;
        match outcome {
            Ok(image) => self.set_image(image),
            Err(err) => {
                self.set_image(None);
                self.set_status_text(format!("Download failed: {err}"));
            }
        }
    }
}

pub struct Screen {
    strategy: ExecutionStrategy,
    source: Arc<dyn ImageSource>,
    dispatcher: TaskDispatcher<Image>,
    state: Arc<Mutex<UiState>>,
    receiver: Option<ListenerId>,
}

impl Screen {
    pub fn create(
        platform: Arc<Platform<Image>>,
        strategy: ExecutionStrategy,
        source: Arc<dyn ImageSource>,
    ) -> Self {
        let mut state = UiState::default();
        if strategy == ExecutionStrategy::Blocking {
            state.set_status_text("Calculating on UI thread: Fibonacci Number");
        } else {
            state.set_status_text(format!("Download image using: {}", strategy.label()));
        }
        info!(strategy = %strategy, "screen created");
        Self {
            strategy,
            source,
            dispatcher: TaskDispatcher::new(platform),
            state: Arc::new(Mutex::new(state)),
            receiver: None,
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    fn ui(&self) -> UiHandle {
        self.dispatcher.platform().ui()
    }

    /// Becomes visible: start listening for broadcast results.
    pub fn on_start(&mut self) {
        if self.receiver.is_some() {
            return;
        }
        let platform = self.dispatcher.platform();
        let ui = platform.ui();
        let state = Arc::clone(&self.state);
        let lifecycle: Lifecycle = self.dispatcher.lifecycle().clone();
        let action = platform.config().broadcast_action.clone();
        let id = platform.broadcaster().register(action, move |outcome: Outcome<Image>| {
            let state = Arc::clone(&state);
            let lifecycle = lifecycle.clone();
            ui.post(move || {
                if !lifecycle.is_destroyed() {
                    lock(&state).apply(outcome);
                }
            })
            .ok();
        });
        self.receiver = Some(id);
    }

    /// Becomes invisible: stop listening for broadcast results.
    pub fn on_stop(&mut self) {
        if let Some(id) = self.receiver.take() {
            self.dispatcher.platform().broadcaster().unregister(id);
        }
    }

    /// The download button.
    ///
    /// With [`ExecutionStrategy::Blocking`] this computes a Fibonacci number
    /// on the UI loop instead, freezing it until done, and returns `Ok(None)`.
    pub fn on_click(&mut self) -> Result<Option<DispatchHandle>, DispatchError> {
        self.post_state(|state| state.set_image(None))?;

        if self.strategy == ExecutionStrategy::Blocking {
            let n = self.dispatcher.platform().config().fibonacci_input;
            let state = Arc::clone(&self.state);
            self.ui().invoke(move || {
                let result = fibonacci(n);
                debug!(n, result, "fibonacci computed on the UI loop");
                lock(&state).show_toast(format!("Result: {result}"));
            })?;
            return Ok(None);
        }

        let state = Arc::clone(&self.state);
        let handle = self.dispatcher.dispatch(
            download_work(Arc::clone(&self.source)),
            self.strategy,
            ResultSink::new(move |outcome| lock(&state).apply(outcome)),
        )?;
        Ok(Some(handle))
    }

    /// Runs an arbitrary work unit through this screen's dispatcher.
    pub fn dispatch(
        &mut self,
        work: WorkUnit<Image>,
        sink: ResultSink<Image>,
    ) -> Result<DispatchHandle, DispatchError> {
        self.dispatcher.dispatch(work, self.strategy, sink)
    }

    /// Copy of the current UI state, read on the UI loop so it reflects
    /// every update posted so far.
    pub fn snapshot(&self) -> Result<UiState, DispatchError> {
        let state = Arc::clone(&self.state);
        self.ui().invoke(move || lock(&state).clone())
    }

    pub fn is_destroyed(&self) -> bool {
        self.dispatcher.is_destroyed()
    }

    /// Stops listening and releases every background resource. Idempotent.
    pub fn destroy(&mut self) {
        self.on_stop();
        self.dispatcher.teardown();
    }

    fn post_state<F>(&self, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut UiState) + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.ui().post(move || f(&mut lock(&state)))
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lock(state: &Mutex<UiState>) -> MutexGuard<'_, UiState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
