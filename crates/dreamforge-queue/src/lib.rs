//! Job dispatch, replacing the teacher's DB-polling `Worker::run_to_completion`
//! (`src/server/src/worker.rs`) with a `Queue`/`WorkerPool` pair.
//!
//! Three implementations share the exact same [`JobHandler`] code path:
//! [`EagerQueue`] runs inline for tests, [`ChannelQueue`] + [`ChannelWorkerPool`]
//! hand work across an in-process bounded channel, and [`RedisQueue`] +
//! [`RedisWorkerPool`] hand work across a process boundary (server enqueues,
//! a separate worker binary consumes) the way a single shared channel never
//! could. All three give prefetch-1/ack-late semantics: a worker only claims
//! its next job after the current one reaches a terminal state.

use std::sync::Arc;

use async_trait::async_trait;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::ports::{JobHandler, Queue, WorkerPool};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

mod redis_queue;
pub use redis_queue::{RedisQueue, RedisWorkerPool};

/// Executes a job inline on the submitting task, synchronously, the moment
/// it is enqueued. Used by tests so the same [`JobHandler`] that backs
/// [`ChannelWorkerPool`] runs without a channel hop (§4.4 "Eager... same
/// code path as async aside from scheduling").
pub struct EagerQueue<H> {
    handler: Arc<H>,
}

impl<H: JobHandler> EagerQueue<H> {
    pub const fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: JobHandler> Queue for EagerQueue<H> {
    async fn enqueue(&self, job_id: Uuid) -> DfResult<()> {
        self.handler.handle(job_id).await
    }
}

/// The producer side of the channel-backed queue.
pub struct ChannelQueue {
    tx: mpsc::Sender<Uuid>,
}

#[async_trait]
impl Queue for ChannelQueue {
    async fn enqueue(&self, job_id: Uuid) -> DfResult<()> {
        self.tx
            .send(job_id)
            .await
            .map_err(|_| DfError::infra_unavailable("worker pool channel closed"))
    }
}

/// The consumer side: `concurrency` tasks pulling one job at a time
/// (prefetch=1) and running it to terminal before asking for the next
/// (ack-late: the channel slot is only freed once `handle` returns).
pub struct ChannelWorkerPool<H> {
    handler: Arc<H>,
    rx: Mutex<mpsc::Receiver<Uuid>>,
    concurrency: usize,
}

/// Build a [`ChannelQueue`]/[`ChannelWorkerPool`] pair sharing one bounded
/// channel. `capacity` bounds how many jobs may sit enqueued-but-unclaimed.
pub fn channel<H: JobHandler>(
    handler: Arc<H>,
    capacity: usize,
    concurrency: usize,
) -> (ChannelQueue, ChannelWorkerPool<H>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelQueue { tx },
        ChannelWorkerPool {
            handler,
            rx: Mutex::new(rx),
            concurrency: concurrency.max(1),
        },
    )
}

#[async_trait]
impl<H: JobHandler + 'static> WorkerPool for ChannelWorkerPool<H> {
    async fn run(&self) -> DfResult<()> {
        let mut tasks = Vec::with_capacity(self.concurrency);
        for worker_index in 0..self.concurrency {
            let handler = self.handler.clone();
            tasks.push(async move {
                loop {
                    let job_id = {
                        let mut rx = self.rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job_id) = job_id else {
                        tracing::info!(worker_index, "queue closed, worker exiting");
                        return;
                    };
                    if let Err(err) = handler.handle(job_id).await {
                        tracing::error!(%job_id, worker_index, error = %err, "job handler failed");
                    }
                }
            });
        }
        futures::future::join_all(tasks).await;
        Ok(())
    }
}
