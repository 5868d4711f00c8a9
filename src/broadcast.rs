//! Process-wide publish/subscribe registry backed by `tokio::sync::broadcast`.
//!
//! [`Broadcaster`] keeps one broadcast channel per action name. Each
//! registered listener gets its own receiver and a forwarding task on the
//! background scheduler that calls it. Payloads are not retained: a send
//! with nobody subscribed is lost, and a new listener only sees payloads
//! sent after it registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

/// Default buffer capacity for each action's channel.
pub const DEFAULT_CAPACITY: usize = 64;

/// Identifies one registration, returned by [`Broadcaster::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    action: String,
    forwarder: AbortHandle,
}

struct Registry<T> {
    channels: HashMap<String, broadcast::Sender<T>>,
    listeners: HashMap<ListenerId, Registration>,
}

/// Fan-out registry keyed by action.
///
/// Listeners run on the background scheduler, never on the sending thread.
/// Each listener sees payloads in send order.
pub struct Broadcaster<T> {
    scheduler: Handle,
    capacity: usize,
    registry: Mutex<Registry<T>>,
    next_id: AtomicU64,
}

impl<T> Broadcaster<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a broadcaster whose forwarding tasks run on `scheduler`.
    ///
    /// When a listener falls `capacity` payloads behind, the oldest ones are
    /// skipped for that listener.
    pub fn new(scheduler: Handle, capacity: usize) -> Self {
        Self {
            scheduler,
            capacity: capacity.max(1),
            registry: Mutex::new(Registry {
                channels: HashMap::new(),
                listeners: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn register<F>(&self, action: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let action = action.into();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.lock();
        let mut receiver = registry
            .channels
            .entry(action.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let forwarder = self.scheduler.spawn({
            let action = action.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(payload) => listener(payload),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(action = %action, listener = id.0, skipped, "listener lagged behind");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });
        registry.listeners.insert(
            id,
            Registration {
                action: action.clone(),
                forwarder: forwarder.abort_handle(),
            },
        );
        debug!(action = %action, listener = id.0, "listener registered");
        id
    }

    /// Removes a registration and stops its forwarding task. Returns `false`
    /// if it was already gone.
    pub fn unregister(&self, id: ListenerId) -> bool {
        match self.lock().listeners.remove(&id) {
            Some(registration) => {
                registration.forwarder.abort();
                debug!(action = %registration.action, listener = id.0, "listener unregistered");
                true
            }
            None => false,
        }
    }

    /// Sends `payload` to every receiver of `action`, returning how many
    /// there were. With nobody subscribed the payload is dropped.
    pub fn send(&self, action: &str, payload: T) -> usize {
        let sender = self.lock().channels.get(action).cloned();
        let Some(sender) = sender else {
            trace!(action, "broadcast with no channel");
            return 0;
        };
        // A SendError only means there are zero receivers.
        let reached = sender.send(payload).unwrap_or(0);
        trace!(action, receivers = reached, "broadcast");
        reached
    }

    pub fn listener_count(&self, action: &str) -> usize {
        self.lock()
            .listeners
            .values()
            .filter(|r| r.action == action)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for Broadcaster<T> {
    fn drop(&mut self) {
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, registration) in registry.listeners.drain() {
            registration.forwarder.abort();
        }
    }
}
