//! `GET /healthz`, `GET /readyz`, `GET /metrics` (§4.9, §6 "Readiness").
//!
//! `/healthz` reports the process is up; `/readyz` additionally probes the
//! dependencies named in `DF_READY_CHECKS` and fails closed if any of them
//! are unreachable, so a load balancer stops sending traffic before the
//! first request fails.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app::App;

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn readyz(State(app): State<App>) -> (StatusCode, Json<Value>) {
    let mut checks = Vec::new();
    let mut ready = true;

    if app.config.ready_checks.db {
        let ok = app.repo.ping().await.is_ok();
        ready &= ok;
        checks.push(json!({ "name": "db", "ok": ok }));
    }
    if app.config.ready_checks.s3 {
        let ok = app.store.ping().await.is_ok();
        ready &= ok;
        checks.push(json!({ "name": "s3", "ok": ok }));
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({ "status": if ready { "ready" } else { "not_ready" }, "checks": checks })),
    )
}

pub async fn metrics(State(handle): State<metrics_exporter_prometheus::PrometheusHandle>) -> String {
    handle.render()
}
