//! The dreamforge HTTP surface (§4.9 C10): job submission, status/artifacts/
//! logs/progress reads, SSE streaming, and a read-only model registry,
//! built on the [`app::App`] composition root.

pub mod app;
pub mod compose;
pub mod error;
mod executor;
mod generate;
mod model_download;
pub mod routes;
mod upscale;
pub mod validation;

use axum::routing::get;
use axum::Router;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use app::{build_executor, App};
pub use executor::StepExecutor;

/// Build the full axum [`Router`], ready to serve. `metrics_handle` is kept
/// separate from [`App`] since it is a Prometheus recorder concern, not a
/// job-orchestration one (§9 ambient stack, grounded on the teacher's own
/// separation of `DefaultHeaders`/`Compress` middleware from its GraphQL
/// `App::data`).
pub fn build_router(app: App, metrics_handle: metrics_exporter_prometheus::PrometheusHandle) -> Router {
    let v1 = Router::new()
        .route("/jobs", get(routes::jobs::list_jobs).post(routes::jobs::create_job))
        .route("/jobs/:id", get(routes::jobs::get_job))
        .route("/jobs/:id/artifacts", get(routes::jobs::list_artifacts))
        .route("/jobs/:id/logs", get(routes::logs::tail_logs))
        .route("/jobs/:id/progress", get(routes::progress::get_progress))
        .route("/jobs/:id/progress/stream", get(routes::progress::progress_stream))
        .route("/models", get(routes::models::list_models))
        .route("/models/:id", get(routes::models::get_model))
        .route("/models/install", axum::routing::post(routes::models::install_model));

    let unprefixed = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz));

    let metrics = Router::new()
        .route("/metrics", get(routes::health::metrics))
        .with_state(metrics_handle);

    Router::new()
        .nest("/v1", v1)
        .merge(unprefixed)
        .with_state(app)
        .merge(metrics)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(120)))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}
