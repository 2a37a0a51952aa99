//! `GET /v1/models`, `GET /v1/models/{id}` (§4.9, §4.6 C11): read-only views
//! over the model registry consumed by the generate handler.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use dreamforge_core::error::DfError;
use dreamforge_core::model::{JobType, Model, Status, Step};
use dreamforge_core::repository::ChainStep;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::App;
use crate::error::{ApiError, ApiResult};

fn model_summary(model: &Model) -> Value {
    json!({
        "id": model.id,
        "name": model.name,
        "kind": model.kind,
        "version": model.version,
        "installed": model.installed,
        "enabled": model.enabled,
        "capabilities": model.capabilities,
    })
}

fn model_descriptor(model: &Model) -> Value {
    json!({
        "id": model.id,
        "name": model.name,
        "kind": model.kind,
        "version": model.version,
        "checkpoint_hash": model.checkpoint_hash,
        "source_uri": model.source_uri,
        "local_path": model.local_path,
        "installed": model.installed,
        "enabled": model.enabled,
        "parameters_schema": model.parameters_schema,
        "capabilities": model.capabilities,
        "files": model.files.iter().map(|f| json!({
            "path": f.path,
            "sha256": f.sha256,
            "size": f.size,
        })).collect::<Vec<_>>(),
        "created_at": model.created_at,
        "updated_at": model.updated_at,
    })
}

pub async fn list_models(State(app): State<App>) -> ApiResult<Json<Value>> {
    let models = app.repo.list_models(true).await?;
    Ok(Json(json!({
        "models": models.iter().map(model_summary).collect::<Vec<_>>(),
    })))
}

pub async fn get_model(State(app): State<App>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let model = app
        .repo
        .get_model(id)
        .await?
        .ok_or_else(|| DfError::not_found(format!("model {id} not found")))?;
    Ok(Json(model_descriptor(&model)))
}

#[derive(Deserialize, Serialize)]
pub struct ModelFileRequest {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

/// `POST /v1/models/install` (§4.6 C11 supplement): the only way a
/// `model_download` job gets created, since `POST /jobs` (C4) only ever
/// accepts `type: "generate"`. Runs through the same queue/step-executor
/// path as any other job rather than installing synchronously inline.
#[derive(Deserialize, Serialize)]
pub struct InstallModelRequest {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub checkpoint_hash: Option<String>,
    #[serde(default)]
    pub parameters_schema: Value,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub local_path: String,
    #[serde(default)]
    pub files: Vec<ModelFileRequest>,
}

pub async fn install_model(
    State(app): State<App>,
    Json(body): Json<InstallModelRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let params = serde_json::to_value(&body).unwrap_or_default();

    let job = app
        .repo
        .create_job_with_chain(
            JobType::ModelDownload,
            params,
            None,
            vec![ChainStep {
                name: Step::MODEL_DOWNLOAD.to_owned(),
                metadata: json!({}),
            }],
        )
        .await?;

    if let Err(err) = app.queue.enqueue(job.id).await {
        let infra_err = DfError::infra_unavailable(format!("queue hand-off failed: {err}"));
        app.repo
            .mark_job_status(job.id, Status::Failed, Some(&infra_err))
            .await?;
        return Err(ApiError(infra_err));
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "job": { "id": job.id, "status": "queued", "type": "model_download" } })),
    ))
}
