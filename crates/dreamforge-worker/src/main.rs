//! The `dreamforge-worker` binary: consumes job ids off the redis list
//! `dreamforge-server` publishes to (§4.3/§4.4 C5) and drives each one
//! through the same [`dreamforge_server::StepExecutor`] the server would
//! run inline in eager mode. Generalizes the teacher's `Worker::run_to_completion`
//! (`src/server/src/worker.rs`, a single OS thread polling the database) to
//! `DF_WORKER_CONCURRENCY` async tasks blocking on redis instead.

use std::sync::Arc;

use dreamforge_core::config::Config;
use dreamforge_core::ports::WorkerPool;
use dreamforge_queue::RedisWorkerPool;
use dreamforge_server::compose::{build_engine, build_repository, build_store, build_upscaler};
use dreamforge_server::build_executor;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type DfBoxResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> DfBoxResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dreamforge_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    if config.celery_eager {
        tracing::warn!(
            "DF_CELERY_EAGER=true: dreamforge-server already runs jobs inline, this worker has nothing to consume"
        );
    }
    let redis_url = config
        .redis_url
        .as_deref()
        .ok_or("DF_REDIS_URL is required for dreamforge-worker")?;

    tracing::info!(%redis_url, concurrency = config.worker_concurrency, "starting dreamforge-worker");

    let repo = build_repository(&config).await?;
    let store = build_store(&config)?;
    let engine = build_engine(&config);
    let upscaler = build_upscaler(&config);
    let executor = Arc::new(build_executor(repo, store, engine, upscaler, &config));

    let pool = RedisWorkerPool::new(executor, redis_url, config.worker_concurrency)?;
    pool.run().await?;
    Ok(())
}
