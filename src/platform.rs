use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

use crate::broadcast::Broadcaster;
use crate::config::DispatcherConfig;
use crate::error::{DispatchError, Outcome};
use crate::service::BackgroundService;
use crate::ui::{UiHandle, UiLoop};

/// Process-wide state shared by every screen: the UI loop, the background
/// scheduler, the broadcaster and the background service.
///
/// Must be dropped outside of an async context, since dropping shuts the
/// background scheduler down.
pub struct Platform<T> {
    config: DispatcherConfig,
    ui: UiLoop,
    runtime: Option<Runtime>,
    scheduler: Handle,
    broadcaster: Arc<Broadcaster<Outcome<T>>>,
    service: BackgroundService<T>,
}

impl<T> Platform<T>
where
    T: Clone + Send + 'static,
{
    pub fn start(config: DispatcherConfig) -> Result<Self, DispatchError> {
        let ui = UiLoop::start("ui-main")?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.runtime_threads)
            .thread_name("background-scheduler")
            .enable_all()
            .build()
            .map_err(|e| DispatchError::unavailable("background scheduler", e))?;
        let scheduler = runtime.handle().clone();
        let broadcaster = Arc::new(Broadcaster::new(
            scheduler.clone(),
            config.broadcast_capacity,
        ));
        let service = BackgroundService::new(
            "background-service",
            config.broadcast_action.clone(),
            Arc::clone(&broadcaster),
        );
        info!(
            runtime_threads = config.runtime_threads,
            pool_size = config.pool_size,
            "platform started"
        );
        Ok(Self {
            config,
            ui,
            runtime: Some(runtime),
            scheduler,
            broadcaster,
            service,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn ui(&self) -> UiHandle {
        self.ui.handle()
    }

    pub fn scheduler(&self) -> Handle {
        self.scheduler.clone()
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster<Outcome<T>>> {
        &self.broadcaster
    }

    pub fn service(&self) -> &BackgroundService<T> {
        &self.service
    }
}

impl<T> Drop for Platform<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.config.shutdown_grace);
        }
        self.ui.shutdown();
        info!("platform stopped");
    }
}
