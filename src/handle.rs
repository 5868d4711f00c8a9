use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::AbortHandle;

use crate::error::DispatchError;
use crate::strategy::ExecutionStrategy;

/// Lifecycle of a single dispatch.
///
/// `Created -> Running -> {Delivered | Cancelled | Leaked}`, plus
/// `Created -> Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Created,
    Running,
    Delivered,
    Cancelled,
    /// The owning screen was torn down without waiting for the work.
    Leaked,
}

impl HandleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => HandleState::Created,
            1 => HandleState::Running,
            2 => HandleState::Delivered,
            3 => HandleState::Cancelled,
            _ => HandleState::Leaked,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandleState::Delivered | HandleState::Cancelled | HandleState::Leaked
        )
    }
}

struct Inner {
    id: u64,
    strategy: ExecutionStrategy,
    state: AtomicU8,
    abort: Mutex<Option<AbortHandle>>,
}

/// Cancellation and inspection token for one dispatch. Cheap to clone.
#[derive(Clone)]
pub struct DispatchHandle {
    inner: Arc<Inner>,
}

impl DispatchHandle {
    pub(crate) fn new(id: u64, strategy: ExecutionStrategy) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                strategy,
                state: AtomicU8::new(HandleState::Created as u8),
                abort: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.inner.strategy
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Stops the dispatch before delivery.
    ///
    /// Returns `Ok(true)` if this call moved the handle to `Cancelled`,
    /// `Ok(false)` if it had already reached a terminal state.
    pub fn cancel(&self) -> Result<bool, DispatchError> {
        if !self.strategy().is_cancellable() {
            return Err(DispatchError::NotCancellable(self.strategy()));
        }
        let cancelled = self.mark_cancelled();
        if cancelled {
            let abort = self
                .inner
                .abort
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(abort) = abort {
                abort.abort();
            }
            tracing::debug!(dispatch_id = self.id(), strategy = %self.strategy(), "dispatch cancelled");
        }
        Ok(cancelled)
    }

    pub(crate) fn set_abort(&self, abort: AbortHandle) {
        let mut slot = self
            .inner
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(abort);
        // Cancelled before the task existed, or raced cancel() to the slot.
        if self.state() == HandleState::Cancelled {
            if let Some(abort) = slot.take() {
                abort.abort();
            }
        }
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.transition(&[HandleState::Created], HandleState::Running)
    }

    pub(crate) fn mark_delivered(&self) -> bool {
        self.transition(
            &[HandleState::Created, HandleState::Running],
            HandleState::Delivered,
        )
    }

    pub(crate) fn mark_cancelled(&self) -> bool {
        self.transition(
            &[HandleState::Created, HandleState::Running],
            HandleState::Cancelled,
        )
    }

    pub(crate) fn mark_leaked(&self) -> bool {
        self.transition(
            &[HandleState::Created, HandleState::Running],
            HandleState::Leaked,
        )
    }

    fn transition(&self, from: &[HandleState], to: HandleState) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if !from.contains(&HandleState::from_u8(current)) {
                return false;
            }
            match self.inner.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("id", &self.id())
            .field("strategy", &self.strategy())
            .field("state", &self.state())
            .finish()
    }
}
