//! # Worker pool
//!
//! N stages behind one shared input and one merged output. The input is a
//! multi-consumer channel, so each item is received by exactly one worker.
//! One forwarder task per worker moves that worker's output into the pool
//! output. Ordering is only preserved per worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::stage::{Stage, StageReceiver, StageSender, stage_channel};
use crate::{PipelineContext, PipelineError, PipelineItem};

pub struct WorkerPool<T> {
    name: String,
    workers: Vec<Box<dyn Stage<T>>>,
    output_tx: StageSender<T>,
    output_rx: StageReceiver<T>,
    running: Arc<AtomicBool>,
}

impl<T: PipelineItem> WorkerPool<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (output_tx, output_rx) = stage_channel(capacity);
        Self {
            name: name.into(),
            workers: Vec::new(),
            output_tx,
            output_rx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a worker. Workers added after `set_input` do not see that input.
    pub fn with_worker<S: Stage<T> + 'static>(mut self, worker: S) -> Self {
        self.workers.push(Box::new(worker));
        self
    }

    pub fn push_worker(&mut self, worker: Box<dyn Stage<T>>) {
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl<T: PipelineItem> Stage<T> for WorkerPool<T> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn set_input(&mut self, input: StageReceiver<T>) {
        for worker in &mut self.workers {
            worker.set_input(input.clone());
        }
    }

    fn output(&self) -> StageReceiver<T> {
        self.output_rx.clone()
    }

    fn start(&mut self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        if self.running.load(Ordering::Acquire) {
            return Err(PipelineError::AlreadyRunning {
                stage: self.name.clone(),
            });
        }
        if self.workers.is_empty() {
            return Err(PipelineError::EmptyPool {
                stage: self.name.clone(),
            });
        }

        let pool_ctx = ctx.child(self.name.clone());
        for worker in &mut self.workers {
            if let Err(e) = worker.start(&pool_ctx) {
                error!(pool = %self.name, worker = %worker.name(), error = %e, "Worker failed to start, stopping pool");
                pool_ctx.token.cancel();
                return Err(PipelineError::StageStart {
                    stage: self.name.clone(),
                    source: Box::new(e),
                });
            }
        }

        self.running.store(true, Ordering::Release);
        let remaining = Arc::new(std::sync::atomic::AtomicUsize::new(self.workers.len()));
        for worker in &self.workers {
            let worker_name = worker.name();
            let from = worker.output();
            let to = self.output_tx.clone();
            let token = pool_ctx.token.clone();
            let remaining = remaining.clone();
            let running = self.running.clone();
            pool_ctx.tracker.spawn(async move {
                forward(&worker_name, from, to, token).await;
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    running.store(false, Ordering::Release);
                }
            });
        }

        info!(pool = %self.name, workers = self.workers.len(), "Worker pool started");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

async fn forward<T: PipelineItem>(
    worker: &str,
    from: StageReceiver<T>,
    to: StageSender<T>,
    token: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            received = from.recv_async() => match received {
                Ok(item) => item,
                Err(_) => break,
            },
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = to.send_async(item) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!(worker, "Forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{HandleOutcome, HandlerStage, StageHandler};
    use crate::test_utils::{create_test_context, init_tracing};
    use crate::BoxError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Tagging {
        seen: Arc<Mutex<Vec<(usize, String)>>>,
        worker: usize,
        ready: bool,
    }

    #[async_trait]
    impl StageHandler<String> for Tagging {
        type Error = std::io::Error;

        fn kind(&self) -> &'static str {
            "tag"
        }

        fn check_ready(&self) -> Result<(), BoxError> {
            if self.ready {
                Ok(())
            } else {
                Err("not ready".into())
            }
        }

        async fn handle(
            &self,
            item: &mut String,
            _token: &CancellationToken,
        ) -> Result<HandleOutcome, std::io::Error> {
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.seen.lock().unwrap().push((self.worker, item.clone()));
            Ok(HandleOutcome::Forward)
        }
    }

    fn pool_of(n: usize, seen: &Arc<Mutex<Vec<(usize, String)>>>, broken: Option<usize>) -> WorkerPool<String> {
        let mut pool = WorkerPool::new("tag-pool", 0);
        for worker in 0..n {
            let handler = Tagging {
                seen: seen.clone(),
                worker,
                ready: broken != Some(worker),
            };
            pool.push_worker(Box::new(HandlerStage::new(worker, Arc::new(handler), 0)));
        }
        pool
    }

    #[tokio::test]
    async fn each_item_is_handled_by_exactly_one_worker() {
        init_tracing();
        let ctx = create_test_context();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pool = pool_of(3, &seen, None);
        let (tx, rx) = stage_channel(0);
        pool.set_input(rx);
        pool.start(&ctx).unwrap();
        assert!(pool.is_running());

        let out = pool.output();
        let items: Vec<String> = (0..30).map(|i| format!("job-{i}")).collect();
        let feeder = {
            let items = items.clone();
            tokio::spawn(async move {
                for item in items {
                    tx.send_async(item).await.unwrap();
                }
            })
        };

        let mut emitted = Vec::new();
        for _ in 0..items.len() {
            emitted.push(
                timeout(Duration::from_secs(5), out.recv_async())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        feeder.await.unwrap();

        let emitted_set: HashSet<_> = emitted.iter().cloned().collect();
        assert_eq!(emitted_set.len(), items.len());
        assert_eq!(emitted_set, items.iter().cloned().collect::<HashSet<_>>());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), items.len());
        let handled: HashSet<_> = seen.iter().map(|(_, item)| item.clone()).collect();
        assert_eq!(handled.len(), items.len());
        drop(seen);

        ctx.token.cancel();
        ctx.tracker.close();
        timeout(Duration::from_secs(2), ctx.tracker.wait())
            .await
            .unwrap();
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn empty_pool_fails_to_start() {
        let ctx = create_test_context();
        let mut pool = WorkerPool::<String>::new("empty", 0);
        let err = pool.start(&ctx).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyPool { .. }));
    }

    #[tokio::test]
    async fn worker_failure_stops_started_workers() {
        init_tracing();
        let ctx = create_test_context();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pool = pool_of(3, &seen, Some(2));
        let (_tx, rx) = stage_channel::<String>(0);
        pool.set_input(rx);

        let err = pool.start(&ctx).unwrap_err();
        assert!(matches!(err, PipelineError::StageStart { .. }));
        assert_eq!(err.stage(), Some("tag-2"));
        assert!(!pool.is_running());
        assert!(!ctx.token.is_cancelled());

        // Workers 0 and 1 were spawned on the pool's child token and must be gone.
        ctx.tracker.close();
        timeout(Duration::from_secs(2), ctx.tracker.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let ctx = create_test_context();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pool = pool_of(2, &seen, None);
        let (_tx, rx) = stage_channel::<String>(0);
        pool.set_input(rx);
        pool.start(&ctx).unwrap();
        assert!(matches!(
            pool.start(&ctx).unwrap_err(),
            PipelineError::AlreadyRunning { .. }
        ));
        ctx.token.cancel();
    }
}
