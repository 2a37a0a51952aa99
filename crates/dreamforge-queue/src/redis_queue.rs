//! The asynchronous queue mode (§4.4, §6 `DF_REDIS_URL`): a single named
//! list workers `BRPOP` from, one task at a time (prefetch=1), replacing the
//! teacher's `redis = "0.10"` sync client (`automaat-processor-redis-command`)
//! with the `tokio-comp` async client so the server and worker binaries can
//! hand work across a process boundary the way `ChannelWorkerPool` cannot.

use std::sync::Arc;

use async_trait::async_trait;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::ports::{JobHandler, Queue, WorkerPool};
use redis::AsyncCommands;
use uuid::Uuid;

const DEFAULT_QUEUE_KEY: &str = "dreamforge:jobs";

fn map_redis_err(err: redis::RedisError) -> DfError {
    DfError::infra_unavailable(format!("redis queue error: {err}"))
}

/// The producer side: `LPUSH`es job ids onto a single named list.
pub struct RedisQueue {
    client: redis::Client,
    queue_key: String,
}

impl RedisQueue {
    pub fn new(redis_url: &str) -> DfResult<Self> {
        Self::with_queue_key(redis_url, DEFAULT_QUEUE_KEY)
    }

    pub fn with_queue_key(redis_url: &str, queue_key: impl Into<String>) -> DfResult<Self> {
        let client = redis::Client::open(redis_url).map_err(map_redis_err)?;
        Ok(Self {
            client,
            queue_key: queue_key.into(),
        })
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn enqueue(&self, job_id: Uuid) -> DfResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_err)?;
        let _: () = conn
            .lpush(&self.queue_key, job_id.to_string())
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }
}

/// The consumer side: `concurrency` tasks each looping on a blocking `BRPOP`
/// against the same list, so at most one worker ever claims a given job
/// (redis pops are atomic) and a worker that crashes mid-job simply never
/// acknowledges — matching `ack_late` (§4.4) by never popping the next item
/// until the current `handle` call returns.
pub struct RedisWorkerPool<H> {
    handler: Arc<H>,
    client: redis::Client,
    queue_key: String,
    concurrency: usize,
    poll_timeout_secs: f64,
}

impl<H: JobHandler> RedisWorkerPool<H> {
    pub fn new(handler: Arc<H>, redis_url: &str, concurrency: usize) -> DfResult<Self> {
        Self::with_queue_key(handler, redis_url, DEFAULT_QUEUE_KEY, concurrency)
    }

    pub fn with_queue_key(
        handler: Arc<H>,
        redis_url: &str,
        queue_key: impl Into<String>,
        concurrency: usize,
    ) -> DfResult<Self> {
        let client = redis::Client::open(redis_url).map_err(map_redis_err)?;
        Ok(Self {
            handler,
            client,
            queue_key: queue_key.into(),
            concurrency: concurrency.max(1),
            poll_timeout_secs: 1.0,
        })
    }
}

#[async_trait]
impl<H: JobHandler + 'static> WorkerPool for RedisWorkerPool<H> {
    async fn run(&self) -> DfResult<()> {
        let mut tasks = Vec::with_capacity(self.concurrency);
        for worker_index in 0..self.concurrency {
            let handler = self.handler.clone();
            let client = self.client.clone();
            let queue_key = self.queue_key.clone();
            let poll_timeout_secs = self.poll_timeout_secs;
            tasks.push(async move {
                loop {
                    let mut conn = match client.get_multiplexed_async_connection().await {
                        Ok(conn) => conn,
                        Err(err) => {
                            tracing::error!(worker_index, error = %err, "redis connection failed, retrying");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                    };
                    let popped: redis::RedisResult<Option<(String, String)>> =
                        conn.brpop(&queue_key, poll_timeout_secs).await;
                    let job_id = match popped {
                        Ok(Some((_, raw))) => raw,
                        Ok(None) => continue,
                        Err(err) => {
                            tracing::error!(worker_index, error = %err, "redis brpop failed");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                            continue;
                        }
                    };
                    let Ok(job_id) = Uuid::parse_str(&job_id) else {
                        tracing::error!(worker_index, %job_id, "queue entry is not a valid job id, dropping");
                        continue;
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
