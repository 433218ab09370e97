//! # Stages
//!
//! A stage owns one execution loop that pulls items from its input channel,
//! runs them through a [`StageHandler`] and forwards them downstream. Business
//! logic lives entirely in the handler, so every stage of a pipeline shares
//! the same lifecycle and cancellation behaviour.
//!
//! Channels are `flume` bounded channels. A capacity of zero gives a
//! rendezvous channel: a send completes only when the next stage takes the
//! item, which is what keeps upstream stages from running ahead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{BoxError, PipelineContext, PipelineError, PipelineItem};

pub type StageSender<T> = flume::Sender<T>;
pub type StageReceiver<T> = flume::Receiver<T>;

/// Create the channel connecting two stages.
pub fn stage_channel<T>(capacity: usize) -> (StageSender<T>, StageReceiver<T>) {
    flume::bounded(capacity)
}

/// Capability set shared by single stages, sources and worker pools.
pub trait Stage<T>: Send {
    fn name(&self) -> String;

    /// Set the channel this stage reads from. Replaces any previous input.
    fn set_input(&mut self, input: StageReceiver<T>);

    /// Receiving end of this stage's output channel.
    fn output(&self) -> StageReceiver<T>;

    /// Spawn the execution loop on the context's tracker and return immediately.
    fn start(&mut self, ctx: &PipelineContext) -> Result<(), PipelineError>;

    fn is_running(&self) -> bool;
}

/// What a handler did with an item it processed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Send the item to the next stage.
    Forward,
    /// The item reached the end of its journey.
    Consumed,
}

/// Business logic for one kind of stage.
#[async_trait]
pub trait StageHandler<T: PipelineItem>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Short name of the stage kind, used for stage names and log records.
    fn kind(&self) -> &'static str;

    /// Checked once by `start`, before the loop is spawned.
    fn check_ready(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn handle(
        &self,
        item: &mut T,
        token: &CancellationToken,
    ) -> Result<HandleOutcome, Self::Error>;

    /// Called after `handle` failed, right before the item is dropped.
    fn on_failure(&self, _item: &T, _error: &Self::Error) {}
}

/// A stage driven by an injected [`StageHandler`].
pub struct HandlerStage<T, H> {
    id: usize,
    handler: Arc<H>,
    input: Option<StageReceiver<T>>,
    output_tx: StageSender<T>,
    output_rx: StageReceiver<T>,
    running: Arc<AtomicBool>,
}

impl<T, H> HandlerStage<T, H>
where
    T: PipelineItem,
    H: StageHandler<T>,
{
    pub fn new(id: usize, handler: Arc<H>, capacity: usize) -> Self {
        let (output_tx, output_rx) = stage_channel(capacity);
        Self {
            id,
            handler,
            input: None,
            output_tx,
            output_rx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<T, H> Stage<T> for HandlerStage<T, H>
where
    T: PipelineItem,
    H: StageHandler<T>,
{
    fn name(&self) -> String {
        format!("{}-{}", self.handler.kind(), self.id)
    }

    fn set_input(&mut self, input: StageReceiver<T>) {
        self.input = Some(input);
    }

    fn output(&self) -> StageReceiver<T> {
        self.output_rx.clone()
    }

    fn start(&mut self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let name = self.name();

        if self.running.load(Ordering::Acquire) {
            return Err(PipelineError::AlreadyRunning { stage: name });
        }
        self.handler
            .check_ready()
            .map_err(|source| PipelineError::NotReady {
                stage: name.clone(),
                source,
            })?;
        let input = self
            .input
            .clone()
            .ok_or_else(|| PipelineError::MissingInput {
                stage: name.clone(),
            })?;

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning { stage: name });
        }

        let handler = self.handler.clone();
        let output = self.output_tx.clone();
        let token = ctx.token.clone();
        let running = self.running.clone();

        ctx.tracker.spawn(async move {
            run_handler_loop(&name, handler, input, output, token).await;
            running.store(false, Ordering::Release);
        });

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

async fn run_handler_loop<T, H>(
    name: &str,
    handler: Arc<H>,
    input: StageReceiver<T>,
    output: StageSender<T>,
    token: CancellationToken,
) where
    T: PipelineItem,
    H: StageHandler<T>,
{
    info!(stage = name, "Stage started");
    let mut handled: u64 = 0;
    let mut failed: u64 = 0;

    loop {
        let mut item = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(stage = name, "Cancellation requested");
                break;
            }
            received = input.recv_async() => match received {
                Ok(item) => item,
                Err(_) => {
                    debug!(stage = name, "Input channel closed");
                    break;
                }
            },
        };

        match handler.handle(&mut item, &token).await {
            Ok(HandleOutcome::Forward) => {
                handled += 1;
                let key = item.key().to_string();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!(stage = name, src = %key, "Cancelled while forwarding");
                        break;
                    }
                    sent = output.send_async(item) => {
                        if sent.is_err() {
                            warn!(stage = name, src = %key, "Downstream closed, stopping");
                            break;
                        }
                        debug!(stage = name, src = %key, "Forwarded");
                    }
                }
            }
            Ok(HandleOutcome::Consumed) => {
                handled += 1;
                debug!(stage = name, src = item.key(), "Consumed");
            }
            Err(e) => {
                failed += 1;
                error!(stage = name, src = item.key(), error = %e, "Handler failed, dropping item");
                handler.on_failure(&item, &e);
            }
        }
    }

    info!(stage = name, handled, failed, "Stage stopped");
}
