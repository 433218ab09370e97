//! Polling source stage
//!
//! A source has no input channel. Its loop asks a [`Source`] for the next item
//! and either forwards it or sleeps for the poll interval, racing cancellation
//! in both cases.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::stage::{Stage, StageReceiver, StageSender, stage_channel};
use crate::{BoxError, PipelineContext, PipelineError, PipelineItem};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
pub trait Source<T: PipelineItem>: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    fn check_ready(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Produce the next item, or `None` when there is nothing to do right now.
    async fn poll_next(&self, token: &CancellationToken) -> Option<T>;
}

pub struct SourceStage<T, S> {
    source: Arc<S>,
    interval: Duration,
    output_tx: StageSender<T>,
    output_rx: StageReceiver<T>,
    running: Arc<AtomicBool>,
}

impl<T, S> SourceStage<T, S>
where
    T: PipelineItem,
    S: Source<T>,
{
    pub fn new(source: Arc<S>, capacity: usize) -> Self {
        let (output_tx, output_rx) = stage_channel(capacity);
        Self {
            source,
            interval: DEFAULT_POLL_INTERVAL,
            output_tx,
            output_rx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl<T, S> Stage<T> for SourceStage<T, S>
where
    T: PipelineItem,
    S: Source<T>,
{
    fn name(&self) -> String {
        self.source.kind().to_string()
    }

    fn set_input(&mut self, _input: StageReceiver<T>) {
        warn!(stage = self.source.kind(), "Source stages take no input, ignoring");
    }

    fn output(&self) -> StageReceiver<T> {
        self.output_rx.clone()
    }

    fn start(&mut self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let name = self.name();
        self.source
            .check_ready()
            .map_err(|source| PipelineError::NotReady {
                stage: name.clone(),
                source,
            })?;
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning { stage: name });
        }

        let source = self.source.clone();
        let output = self.output_tx.clone();
        let token = ctx.token.clone();
        let running = self.running.clone();
        let interval = self.interval;

        ctx.tracker.spawn(async move {
            info!(stage = %name, interval_ms = interval.as_millis() as u64, "Source started");
            let mut produced: u64 = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = source.poll_next(&token) => next,
                };

                match next {
                    Some(item) => {
                        let key = item.key().to_string();
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                debug!(stage = %name, src = %key, "Cancelled while forwarding");
                                break;
                            }
                            sent = output.send_async(item) => {
                                if sent.is_err() {
                                    warn!(stage = %name, "Downstream closed, stopping");
                                    break;
                                }
                                produced += 1;
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                    }
                }
            }
            running.store(false, Ordering::Release);
            info!(stage = %name, produced, "Source stopped");
        });

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
