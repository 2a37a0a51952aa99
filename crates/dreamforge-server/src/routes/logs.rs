//! `GET /v1/jobs/{id}/logs?tail=&since_ts=` (§4.9): one JSON object per line,
//! `application/x-ndjson`, `Cache-Control: no-store`.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use dreamforge_core::error::DfError;
use dreamforge_core::model::Event;
use serde::Deserialize;
use uuid::Uuid;

use crate::app::App;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct LogsQuery {
    tail: Option<u32>,
    since_ts: Option<DateTime<Utc>>,
}

fn log_line(event: &Event) -> String {
    let message = event.payload.get("message").and_then(|v| v.as_str()).unwrap_or(&event.code);
    let line = serde_json::json!({
        "ts": event.ts,
        "level": event.level,
        "code": event.code,
        "message": message,
        "job_id": event.job_id,
        "step_id": event.step_id,
        "item_index": event.payload.get("item_index"),
    });
    format!("{line}\n")
}

pub async fn tail_logs(
    State(app): State<App>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    app.repo
        .get_job(id)
        .await?
        .ok_or_else(|| DfError::not_found(format!("job {id} not found")))?;

    let tail = query.tail.unwrap_or(app.config.logs_tail_default);
    if tail == 0 || tail > app.config.logs_tail_max {
        return Err(DfError::invalid_input(format!(
            "tail must be in [1, {}]",
            app.config.logs_tail_max
        ))
        .into());
    }

    let events = app.repo.iter_events(id, query.since_ts, Some(tail)).await?;
    let body = events.iter().map(log_line).collect::<String>();

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    ))
}
