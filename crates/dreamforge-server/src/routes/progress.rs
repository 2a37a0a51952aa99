//! `GET /v1/jobs/{id}/progress` and `GET /v1/jobs/{id}/progress/stream`
//! (§4.9 C9/C10). The stream is expressed as a lazy, finite sequence per §9
//! ("SSE generator... a lazy, finite sequence of (eventType, payload) closed
//! by a terminal signal") via [`futures::stream::unfold`], rather than a
//! hand-rolled polling loop wired directly to the response body.

use std::collections::VecDeque;
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use dreamforge_core::error::DfError;
use dreamforge_core::model::{Artifact, Event, Job, Step};
use dreamforge_core::progress::{progress_for_job, stages_for_chain, StepProgress};
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::App;
use crate::error::ApiResult;

fn progress_snapshot(job: &Job, steps: &[Step], artifacts: &[Artifact]) -> Value {
    let count = job.params["count"].as_u64().unwrap_or(1) as u32;
    let has_upscale = steps.iter().any(|s| s.name == Step::UPSCALE);

    let step_progresses: Vec<StepProgress> = steps
        .iter()
        .map(|step| StepProgress {
            status: step.status,
            expected_items: count,
            produced_items: artifacts.iter().filter(|a| a.step_id == step.id).count() as u32,
        })
        .collect();
    let progress = progress_for_job(&step_progresses);

    let terminal_step_id = steps.last().map(|s| s.id);
    let items: Vec<Value> = (0..count)
        .map(|item_index| {
            let done = artifacts
                .iter()
                .any(|a| Some(a.step_id) == terminal_step_id && a.item_index == item_index);
            json!({ "item_index": item_index, "progress": if done { 1.0 } else { 0.0 } })
        })
        .collect();

    let stages = stages_for_chain(has_upscale);
    json!({
        "progress": progress,
        "items": items,
        "stages": stages.iter().map(|(name, weight)| json!({ "name": name, "weight": weight })).collect::<Vec<_>>(),
    })
}

pub async fn get_progress(State(app): State<App>, Path(id): Path<Uuid>) -> ApiResult<axum::Json<Value>> {
    let (job, steps) = app
        .repo
        .get_job_with_steps(id)
        .await?
        .ok_or_else(|| DfError::not_found(format!("job {id} not found")))?;
    let artifacts = app.repo.list_artifacts_by_job(id).await?;
    Ok(axum::Json(progress_snapshot(&job, &steps, &artifacts)))
}

#[derive(Deserialize)]
pub struct StreamQuery {
    since_ts: Option<DateTime<Utc>>,
}

fn event_sse_kind(event: &Event) -> &'static str {
    match event.code.as_str() {
        "artifact.written" => "artifact",
        "error" => "error",
        _ => "log",
    }
}

fn event_payload(event: &Event) -> Value {
    json!({
        "ts": event.ts,
        "code": event.code,
        "level": event.level,
        "payload": event.payload,
    })
}

struct StreamState {
    app: App,
    job_id: Uuid,
    cursor: DateTime<Utc>,
    last_seen_id: Option<Uuid>,
    queued: VecDeque<SseEvent>,
    done: bool,
}

async fn next_batch(mut state: StreamState) -> Option<(Result<SseEvent, Infallible>, StreamState)> {
    loop {
        if let Some(event) = state.queued.pop_front() {
            return Some((Ok(event), state));
        }
        if state.done {
            return None;
        }

        tokio::time::sleep(state.app.config.sse_poll).await;

        let events = state
            .app
            .repo
            .iter_events(state.job_id, Some(state.cursor), None)
            .await
            .unwrap_or_default();
        // `iter_events` treats the cursor as inclusive, so the last event of
        // the previous batch re-matches here; drop it by id rather than by
        // timestamp, since several events can share a millisecond.
        let events: Vec<_> = events
            .into_iter()
            .filter(|e| Some(e.id) != state.last_seen_id)
            .collect();
        for event in &events {
            state.queued.push_back(
                SseEvent::default()
                    .event(event_sse_kind(event))
                    .data(event_payload(event).to_string()),
            );
        }
        if let Some(last) = events.last() {
            state.cursor = last.ts;
            state.last_seen_id = Some(last.id);
        }

        let Ok(Some((job, steps))) = state.app.repo.get_job_with_steps(state.job_id).await else {
            state.done = true;
            continue;
        };
        let artifacts = state.app.repo.list_artifacts_by_job(state.job_id).await.unwrap_or_default();
        let snapshot = progress_snapshot(&job, &steps, &artifacts);
        state
            .queued
            .push_back(SseEvent::default().event("progress").data(snapshot.to_string()));

        if job.status.is_terminal() {
            state.done = true;
        }
    }
}

pub async fn progress_stream(
    State(app): State<App>,
    Path(id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    app.repo
        .get_job(id)
        .await?
        .ok_or_else(|| DfError::not_found(format!("job {id} not found")))?;

    let heartbeat = app.config.sse_heartbeat;
    let initial = StreamState {
        cursor: query.since_ts.unwrap_or_else(Utc::now),
        last_seen_id: None,
        app,
        job_id: id,
        queued: VecDeque::new(),
        done: false,
    };

    let stream = futures::stream::unfold(initial, next_batch);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(heartbeat)))
}
