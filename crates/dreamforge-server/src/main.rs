//! The `dreamforge-server` binary: the HTTP surface, plus (only in eager
//! mode, §4.4) the in-process execution of every job it accepts. Mirrors the
//! shape of the teacher's `src/server/src/main.rs`: read configuration,
//! connect the database, run migrations, start serving.

use std::sync::Arc;

use dreamforge_core::config::Config;
use dreamforge_core::ports::Queue;
use dreamforge_queue::{EagerQueue, RedisQueue};
use dreamforge_server::compose::{build_engine, build_repository, build_store, build_upscaler};
use dreamforge_server::{build_executor, build_router, App};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type DfBoxResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> DfBoxResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dreamforge_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(bind = %config.bind, "starting dreamforge-server");

    let repo = build_repository(&config).await?;
    let store = build_store(&config)?;
    let engine = build_engine(&config);
    let upscaler = build_upscaler(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install metrics recorder: {e}"))?;

    let executor = Arc::new(build_executor(repo.clone(), store.clone(), engine, upscaler, &config));

    // §4.4: eager runs every job inline on the submitting request, the same
    // code path minus scheduling. Otherwise the server only publishes to
    // redis — a separately deployed `dreamforge-worker` does the consuming,
    // which is what lets the two binaries scale independently.
    let queue: Arc<dyn Queue> = if config.celery_eager {
        tracing::info!("DF_CELERY_EAGER=true, running jobs inline on the submitting request");
        Arc::new(EagerQueue::new(executor))
    } else {
        let redis_url = config
            .redis_url
            .as_deref()
            .ok_or("DF_REDIS_URL is required when DF_CELERY_EAGER=false")?;
        tracing::info!(%redis_url, "publishing jobs to redis for dreamforge-worker to consume");
        Arc::new(RedisQueue::new(redis_url)?)
    };

    let app = App::new(repo, store, queue, config.clone());
    let router = build_router(app, metrics_handle);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
