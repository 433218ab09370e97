//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use pipeline_common::ChannelPipeline;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::active_time::{ActiveTimeGate, ActiveTimeWindow};
use crate::api::server::AppState;
use crate::codecs::CodecRegistry;
use crate::logging::LoggingConfig;
use crate::stages::{Directories, PipelineSettings, StageServices, build_pipeline};
use crate::status::StatusRegistry;
use crate::task::Task;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Status table shared by the stages, the console and the API.
    pub registry: Arc<StatusRegistry>,
    /// Active time gate.
    pub gate: ActiveTimeGate,
    /// Codec, mux and demux implementations.
    pub codecs: Arc<CodecRegistry>,
    /// Log filter handle, absent when logging was not initialized here.
    pub logging_config: Option<Arc<LoggingConfig>>,
    dirs: Directories,
    settings: PipelineSettings,
    pipeline: Option<ChannelPipeline<Task>>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create the container. Spawns the gate loop, so a runtime must be
    /// running.
    pub fn new(
        dirs: Directories,
        settings: PipelineSettings,
        window: ActiveTimeWindow,
        codecs: CodecRegistry,
    ) -> Self {
        info!("Initializing service container");

        let cancellation_token = CancellationToken::new();
        let gate = ActiveTimeGate::spawn(window, cancellation_token.child_token());

        Self {
            registry: Arc::new(StatusRegistry::new()),
            gate,
            codecs: Arc::new(codecs),
            logging_config: None,
            dirs,
            settings,
            pipeline: None,
            cancellation_token,
        }
    }

    pub fn with_logging_config(mut self, config: Arc<LoggingConfig>) -> Self {
        self.logging_config = Some(config);
        self
    }

    /// Components handed to every stage handler.
    pub fn stage_services(&self) -> StageServices {
        StageServices {
            registry: self.registry.clone(),
            gate: self.gate.clone(),
            codecs: self.codecs.clone(),
            dirs: self.dirs.clone(),
        }
    }

    /// State for the HTTP surface.
    pub fn api_state(&self) -> AppState {
        let state = AppState::new(
            self.registry.clone(),
            self.gate.clone(),
            self.dirs.monitor.clone(),
        );
        match &self.logging_config {
            Some(config) => state.with_logging_config(config.clone()),
            None => state,
        }
    }

    pub fn directories(&self) -> &Directories {
        &self.dirs
    }

    /// Build and start the job pipeline.
    ///
    /// A stage that is not ready (a missing directory, an empty pool) makes
    /// this fail and cancels whatever already started.
    pub fn initialize(&mut self) -> Result<()> {
        let mut pipeline = build_pipeline(
            self.settings,
            &self.stage_services(),
            self.cancellation_token.child_token(),
        );
        pipeline.start()?;

        info!(
            workers = self.settings.workers,
            monitor_dir = %self.dirs.monitor.display(),
            work_dir = %self.dirs.work.display(),
            output_dir = %self.dirs.output.display(),
            "Job pipeline running"
        );
        self.pipeline = Some(pipeline);

        if let Some(config) = &self.logging_config {
            config.start_retention_cleanup(self.cancellation_token.child_token());
        }
        Ok(())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Cancel everything and wait for the pipeline to drain.
    ///
    /// Running external tools are killed through the token.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        if let Some(pipeline) = &self.pipeline {
            if tokio::time::timeout(timeout, pipeline.wait()).await.is_err() {
                warn!("Shutdown timeout reached, forcing shutdown");
            }
        }

        info!("Services shut down");
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
