//! The job pipeline: discovery, transcode, misc, mux and finalize.
//!
//! Each stage kind is a [`StageHandler`](pipeline_common::StageHandler) (or a
//! [`Source`](pipeline_common::Source) for discovery) run by the generic stages
//! from `pipeline_common`. Handlers record progress in the shared
//! [`StatusRegistry`] and report failures there before the task is dropped.

mod discovery;
mod finalize;
mod misc;
mod mux;
mod transcode;

pub use discovery::JobDiscovery;
pub use finalize::FinalizeHandler;
pub use misc::MiscHandler;
pub use mux::MuxHandler;
pub use transcode::TranscodeHandler;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pipeline_common::{
    BoxError, CancellationToken, ChannelPipeline, HandlerStage, SourceStage, WorkerPool,
};
use tracing::{debug, warn};

use crate::active_time::ActiveTimeGate;
use crate::codecs::CodecRegistry;
use crate::status::{StatusCode, StatusRegistry};
use crate::task::Task;
use crate::utils::fs::require_dir;
use crate::{Error, Result};

/// The three directories a job moves through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directories {
    pub monitor: PathBuf,
    pub work: PathBuf,
    pub output: PathBuf,
}

impl Directories {
    /// Where unreadable descriptors are moved.
    pub fn recycle(&self) -> PathBuf {
        self.monitor.join("recycle")
    }
}

/// Shared components injected into every stage handler.
#[derive(Debug, Clone)]
pub struct StageServices {
    pub registry: Arc<StatusRegistry>,
    pub gate: ActiveTimeGate,
    pub codecs: Arc<CodecRegistry>,
    pub dirs: Directories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Number of concurrent transcode workers.
    pub workers: usize,
    pub channel_capacity: usize,
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            channel_capacity: 0,
            poll_interval: pipeline_common::DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Wire discovery → transcode pool → misc → mux → finalize.
pub fn build_pipeline(
    settings: PipelineSettings,
    services: &StageServices,
    token: CancellationToken,
) -> ChannelPipeline<Task> {
    let capacity = settings.channel_capacity;

    let discovery = SourceStage::new(Arc::new(JobDiscovery::new(services.clone())), capacity)
        .with_interval(settings.poll_interval);

    let transcode = Arc::new(TranscodeHandler::new(services.clone()));
    let mut pool = WorkerPool::new("transcode-pool", capacity);
    for id in 0..settings.workers {
        pool.push_worker(Box::new(HandlerStage::new(id, transcode.clone(), capacity)));
    }

    ChannelPipeline::new("monitor-encoder", token)
        .add_stage(discovery)
        .add_stage(pool)
        .add_stage(HandlerStage::new(
            0,
            Arc::new(MiscHandler::new(services.clone())),
            capacity,
        ))
        .add_stage(HandlerStage::new(
            0,
            Arc::new(MuxHandler::new(services.clone())),
            capacity,
        ))
        .add_stage(HandlerStage::new(
            0,
            Arc::new(FinalizeHandler::new(services.clone())),
            capacity,
        ))
}

/// Record a failed task as ERROR with the error text as its description.
///
/// A task interrupted by shutdown keeps its last status.
fn record_failure(registry: &StatusRegistry, stage: &str, task: &Task, err: &Error) {
    if err.is_cancelled() {
        debug!(stage, src = %task.src(), "Task interrupted by shutdown");
        return;
    }
    warn!(stage, src = %task.src(), error = %err, "Task failed");
    registry.set_status(task.src(), StatusCode::Error, err.to_string());
}

fn require_dirs(dirs: &[&Path]) -> std::result::Result<(), BoxError> {
    for dir in dirs {
        require_dir(dir)?;
    }
    Ok(())
}

async fn require_source(task: &Task) -> Result<()> {
    match tokio::fs::try_exists(task.src()).await {
        Ok(true) => Ok(()),
        _ => Err(Error::SourceMissing(task.src().to_string())),
    }
}
