//! # Channel-Based Pipeline Implementation
//!
//! This module wires stages into a chain where each stage runs in its own
//! task and reads the output channel of the stage before it. The pipeline
//! owns the root cancellation token and the task tracker every stage loop is
//! spawned on.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::stage::{Stage, StageReceiver};
use crate::{PipelineContext, PipelineError, PipelineItem};

pub struct ChannelPipeline<T> {
    stages: Vec<Box<dyn Stage<T>>>,
    context: PipelineContext,
    started: bool,
}

impl<T: PipelineItem> ChannelPipeline<T> {
    /// Create an empty pipeline driven by the given root token.
    pub fn new(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            stages: Vec::new(),
            context: PipelineContext::with_name(name, token),
            started: false,
        }
    }

    /// Append a stage, connecting its input to the previous stage's output.
    pub fn add_stage<S: Stage<T> + 'static>(mut self, mut stage: S) -> Self {
        if let Some(previous) = self.stages.last() {
            stage.set_input(previous.output());
        }
        self.stages.push(Box::new(stage));
        self
    }

    /// Start every stage in order.
    ///
    /// If any stage fails, the root token is cancelled so the stages that
    /// already started wind down, and the error names the failing stage.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.started {
            return Err(PipelineError::AlreadyRunning {
                stage: self.context.name.clone(),
            });
        }
        if self.stages.is_empty() {
            return Err(PipelineError::NoStages);
        }

        for stage in &mut self.stages {
            if let Err(e) = stage.start(&self.context) {
                let name = stage.name();
                error!(pipeline = %self.context.name, stage = %name, error = %e, "Stage failed to start");
                self.context.token.cancel();
                return Err(PipelineError::StageStart {
                    stage: name,
                    source: Box::new(e),
                });
            }
        }

        self.started = true;
        info!(
            pipeline = %self.context.name,
            stages = ?self.stage_names(),
            "Pipeline started"
        );
        Ok(())
    }

    /// Output of the last stage, if any.
    pub fn output(&self) -> Option<StageReceiver<T>> {
        self.stages.last().map(|stage| stage.output())
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.context.token
    }

    pub fn is_running(&self) -> bool {
        self.stages.iter().any(|stage| stage.is_running())
    }

    /// Request every stage to stop.
    pub fn stop(&self) {
        self.context.token.cancel();
    }

    /// Wait until every spawned stage loop and forwarder has exited.
    pub async fn wait(&self) {
        self.context.tracker.close();
        self.context.tracker.wait().await;
        info!(pipeline = %self.context.name, "Pipeline stopped");
    }

    pub async fn shutdown(&self) {
        self.stop();
        self.wait().await;
    }
}
