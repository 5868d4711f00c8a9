use crate::strategy::ExecutionStrategy;

/// Errors surfaced by dispatching work or by the resources backing it.
///
/// `Clone` so an outcome can be fanned out to every broadcast listener.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Work unit fault: {0}")]
    WorkUnitFault(String),
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Strategy {0} does not support cancellation")]
    NotCancellable(ExecutionStrategy),
    #[error("Dispatcher has been destroyed")]
    Destroyed,
    #[error("UI loop is closed")]
    UiClosed,
}

impl DispatchError {
    pub(crate) fn unavailable(what: &str, err: impl std::fmt::Display) -> Self {
        DispatchError::ResourceUnavailable(format!("{what}: {err}"))
    }
}

impl From<tokio::task::JoinError> for DispatchError {
    fn from(err: tokio::task::JoinError) -> Self {
        DispatchError::WorkUnitFault(format!("Join error: {err}"))
    }
}

impl From<rayon::ThreadPoolBuildError> for DispatchError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        DispatchError::unavailable("thread pool", err)
    }
}

/// Result delivered to a sink or broadcast listener. `Ok(None)` is a valid
/// "no result" terminal state, not an error.
pub type Outcome<T> = Result<Option<T>, DispatchError>;
