use std::fmt;
use std::str::FromStr;

/// How a work unit is run and how its result travels back to the UI loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStrategy {
    /// Runs on the calling thread. Exists to show what every other strategy avoids.
    Blocking,
    DirectThread,
    TaskAbstraction,
    BackgroundService,
    PostedToOwnedLoop,
    DedicatedWorkerLoop,
    SharedPool,
    ReactivePipeline,
    Coroutine,
}

impl ExecutionStrategy {
    pub const ALL: [ExecutionStrategy; 9] = [
        ExecutionStrategy::Blocking,
        ExecutionStrategy::DirectThread,
        ExecutionStrategy::TaskAbstraction,
        ExecutionStrategy::BackgroundService,
        ExecutionStrategy::PostedToOwnedLoop,
        ExecutionStrategy::DedicatedWorkerLoop,
        ExecutionStrategy::SharedPool,
        ExecutionStrategy::ReactivePipeline,
        ExecutionStrategy::Coroutine,
    ];

    /// Kebab-case name accepted by [`FromStr`] and used in configuration.
    pub fn name(self) -> &'static str {
        match self {
            ExecutionStrategy::Blocking => "blocking",
            ExecutionStrategy::DirectThread => "direct-thread",
            ExecutionStrategy::TaskAbstraction => "task-abstraction",
            ExecutionStrategy::BackgroundService => "background-service",
            ExecutionStrategy::PostedToOwnedLoop => "posted-to-owned-loop",
            ExecutionStrategy::DedicatedWorkerLoop => "dedicated-worker-loop",
            ExecutionStrategy::SharedPool => "shared-pool",
            ExecutionStrategy::ReactivePipeline => "reactive-pipeline",
            ExecutionStrategy::Coroutine => "coroutine",
        }
    }

    /// Human readable label shown in the screen's status line.
    pub fn label(self) -> &'static str {
        match self {
            ExecutionStrategy::Blocking => "Blocking",
            ExecutionStrategy::DirectThread => "Thread",
            ExecutionStrategy::TaskAbstraction => "Task",
            ExecutionStrategy::BackgroundService => "Background service",
            ExecutionStrategy::PostedToOwnedLoop => "Posted to UI loop",
            ExecutionStrategy::DedicatedWorkerLoop => "Worker loop",
            ExecutionStrategy::SharedPool => "Thread pool",
            ExecutionStrategy::ReactivePipeline => "Reactive",
            ExecutionStrategy::Coroutine => "Coroutine",
        }
    }

    /// Whether in-flight work can be stopped before delivery.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            ExecutionStrategy::TaskAbstraction
                | ExecutionStrategy::ReactivePipeline
                | ExecutionStrategy::Coroutine
        )
    }

    /// Whether results are published on the broadcaster instead of the sink.
    pub fn publishes(self) -> bool {
        matches!(self, ExecutionStrategy::BackgroundService)
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown execution strategy: {0}")]
pub struct UnknownStrategy(pub String);

impl FromStr for ExecutionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        ExecutionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == wanted)
            .ok_or_else(|| UnknownStrategy(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for strategy in ExecutionStrategy::ALL {
            assert_eq!(strategy.name().parse::<ExecutionStrategy>(), Ok(strategy));
        }
    }

    #[test]
    fn parsing_accepts_snake_case_and_rejects_unknown() {
        assert_eq!(
            "shared_pool".parse::<ExecutionStrategy>(),
            Ok(ExecutionStrategy::SharedPool)
        );
        assert!("handler".parse::<ExecutionStrategy>().is_err());
    }

    #[test]
    fn only_task_reactive_and_coroutine_are_cancellable() {
        let cancellable: Vec<_> = ExecutionStrategy::ALL
            .into_iter()
            .filter(|s| s.is_cancellable())
            .collect();
        assert_eq!(
            cancellable,
            vec![
                ExecutionStrategy::TaskAbstraction,
                ExecutionStrategy::ReactivePipeline,
                ExecutionStrategy::Coroutine
            ]
        );
    }
}
