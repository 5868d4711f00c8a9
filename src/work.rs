use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use crate::error::{DispatchError, Outcome};

/// Image payload produced by an [`ImageSource`](crate::downloader::ImageSource).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub id: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

type Body<T> = Box<dyn FnOnce() -> Option<T> + Send + 'static>;

/// A deferred, zero-argument blocking computation.
///
/// Running a work unit consumes it, so it executes at most once.
pub struct WorkUnit<T> {
    body: Body<T>,
}

impl<T> WorkUnit<T> {
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        Self {
            body: Box::new(body),
        }
    }

    /// Runs the body on the current thread. A panic becomes
    /// [`DispatchError::WorkUnitFault`] instead of unwinding the caller.
    pub fn run(self) -> Outcome<T> {
        panic::catch_unwind(AssertUnwindSafe(self.body))
            .map_err(|payload| DispatchError::WorkUnitFault(panic_message(payload.as_ref())))
    }
}

impl<T> fmt::Debug for WorkUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit").finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

type Callback<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

/// Single-consumer result callback. `invoke` takes `self`, so a sink can be
/// called at most once.
pub struct ResultSink<T> {
    callback: Callback<T>,
}

impl<T> ResultSink<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sink that ignores whatever it is given.
    pub fn discard() -> Self
    where
        T: 'static,
    {
        Self::new(|_| {})
    }

    pub fn invoke(self, outcome: Outcome<T>) {
        (self.callback)(outcome)
    }
}

impl<T> fmt::Debug for ResultSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink").finish_non_exhaustive()
    }
}
