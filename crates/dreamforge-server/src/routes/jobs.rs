//! `POST /v1/jobs`, `GET /v1/jobs`, `GET /v1/jobs/{id}`,
//! `GET /v1/jobs/{id}/artifacts` (§4.3 C4, §4.9 C10).

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use dreamforge_core::error::DfError;
use dreamforge_core::model::{Artifact, Job, Status, Step};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::App;
use crate::error::{ApiError, ApiResult};
use crate::validation::CreateJobRequest;

pub async fn create_job(
    State(app): State<App>,
    headers: HeaderMap,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let validated = body.validate()?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty());

    let job = app
        .repo
        .create_job_with_chain(
            dreamforge_core::model::JobType::Generate,
            validated.params,
            idempotency_key,
            validated.chain,
        )
        .await?;

    if let Err(err) = app.queue.enqueue(job.id).await {
        let infra_err = DfError::infra_unavailable(format!("queue hand-off failed: {err}"));
        app.repo
            .mark_job_status(job.id, Status::Failed, Some(&infra_err))
            .await?;
        return Err(ApiError(infra_err));
    }
    metrics::counter!("jobs_submitted_total").increment(1);

    Ok((
        StatusCode::OK,
        Json(json!({
            "job": {
                "id": job.id,
                "status": "queued",
                "type": "generate",
                "created_at": job.created_at,
            }
        })),
    ))
}

fn job_summary(job: &Job, steps: &[Step], artifacts: &[Artifact]) -> Value {
    let count = job.params["count"].as_u64().unwrap_or(1);
    let terminal_step_id = steps.last().map(|s| s.id);
    let completed = artifacts
        .iter()
        .filter(|a| Some(a.step_id) == terminal_step_id)
        .count();

    let mut envelope = json!({
        "id": job.id,
        "type": job.job_type,
        "status": job.status,
        "created_at": job.created_at,
        "updated_at": job.updated_at,
        "steps": steps.iter().map(|s| json!({ "name": s.name, "status": s.status })).collect::<Vec<_>>(),
        "summary": { "count": count, "completed": completed },
    });
    if let Some(code) = &job.error_code {
        envelope["error_code"] = json!(code);
    }
    if let Some(message) = &job.error_message {
        envelope["error_message"] = json!(message);
    }
    envelope
}

pub async fn get_job(
    State(app): State<App>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let (job, steps) = app
        .repo
        .get_job_with_steps(id)
        .await?
        .ok_or_else(|| DfError::not_found(format!("job {id} not found")))?;
    let artifacts = app.repo.list_artifacts_by_job(id).await?;
    Ok(Json(job_summary(&job, &steps, &artifacts)))
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    status: Option<String>,
    limit: Option<u32>,
}

pub async fn list_jobs(
    State(app): State<App>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(|s| match s {
            "queued" => Ok(Status::Queued),
            "running" => Ok(Status::Running),
            "succeeded" => Ok(Status::Succeeded),
            "failed" => Ok(Status::Failed),
            other => Err(DfError::invalid_input(format!("unknown status {other:?}"))),
        })
        .transpose()?;
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let jobs = app.repo.list_jobs(status, limit).await?;
    Ok(Json(json!({
        "jobs": jobs.iter().map(|j| json!({
            "id": j.id,
            "type": j.job_type,
            "status": j.status,
            "created_at": j.created_at,
            "updated_at": j.updated_at,
        })).collect::<Vec<_>>(),
    })))
}

pub async fn list_artifacts(
    State(app): State<App>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    app.repo
        .get_job(id)
        .await?
        .ok_or_else(|| DfError::not_found(format!("job {id} not found")))?;

    let ttl = app
        .config
        .s3
        .as_ref()
        .map_or(3600, |s3| s3.presign_expires_s);
    let artifacts = app.repo.list_artifacts_by_job(id).await?;

    let mut entries = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let url = app.store.presign_get(&artifact.s3_key, ttl).await?;
        entries.push(json!({
            "id": artifact.id,
            "format": artifact.format,
            "width": artifact.width,
            "height": artifact.height,
            "seed": artifact.seed,
            "item_index": artifact.item_index,
            "s3_key": artifact.s3_key,
            "url": url,
            "expires_at": chrono::Utc::now() + chrono::Duration::seconds(ttl as i64),
        }));
    }

    Ok(Json(json!({ "artifacts": entries })))
}
