//! # Pipeline Common
//!
//! This crate provides the plumbing for building long-running job pipelines.
//! Each stage runs in its own Tokio task and stages are connected by
//! channels, so a job moves from stage to stage by value.
//!
//! ## Features
//!
//! - `Stage<T>` capability trait shared by single stages, sources and pools
//! - `HandlerStage<T, H>`: one generic stage driven by an injected `StageHandler<T>`
//! - `SourceStage<T, S>`: a polling stage with no input, driven by a `Source<T>`
//! - `WorkerPool<T>`: N stages behind one input and one output (fan-out / fan-in)
//! - `ChannelPipeline<T>`: wiring, start, stop and completion tracking
//!
//! ## License
//!
//! MIT License
//!
//! ## Authors
//!
//! - hua0512
//!

use thiserror::Error;

pub mod channel_pipeline;
mod context;
pub mod source;
pub mod stage;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod worker_pool;

/// Re-export key traits and types
pub use channel_pipeline::ChannelPipeline;
pub use context::PipelineContext;
pub use source::{DEFAULT_POLL_INTERVAL, Source, SourceStage};
pub use stage::{
    HandleOutcome, HandlerStage, Stage, StageHandler, StageReceiver, StageSender, stage_channel,
};
pub use worker_pool::WorkerPool;

pub use tokio_util::sync::CancellationToken;

/// Boxed error used where a stage reports a failure it does not own.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Items that travel through a channel pipeline.
pub trait PipelineItem: Send + 'static {
    /// Identifier used in log records (a job's source path, for instance).
    fn key(&self) -> &str;
}

impl PipelineItem for String {
    fn key(&self) -> &str {
        self
    }
}

/// Common error type for pipeline lifecycle operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} already running")]
    AlreadyRunning { stage: String },

    #[error("input stream not set for {stage}")]
    MissingInput { stage: String },

    #[error("{stage} is not ready: {source}")]
    NotReady {
        stage: String,
        #[source]
        source: BoxError,
    },

    #[error("worker list of {stage} is empty")]
    EmptyPool { stage: String },

    #[error("failed to start {stage}: {source}")]
    StageStart {
        stage: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("pipeline has no stages")]
    NoStages,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl PipelineError {
    /// Name of the stage the error originates from, looking through `StageStart` wrappers.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStart { source, stage } => source.stage().or(Some(stage)),
            Self::AlreadyRunning { stage }
            | Self::MissingInput { stage }
            | Self::NotReady { stage, .. }
            | Self::EmptyPool { stage } => Some(stage),
            Self::NoStages | Self::Cancelled | Self::ChannelClosed(_) => None,
        }
    }
}
