//! A local file-backed [`Repository`] (§6 "DB: `DF_DB_URL` falls back to
//! local file-based store"): the same in-memory shape
//! [`dreamforge_core::test_support::InMemoryRepository`] uses, made durable
//! by round-tripping the whole state to a single JSON file after every
//! mutating call. Meant for single-process development and small
//! deployments, not for concurrent writers across processes.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::model::{Artifact, Event, Job, JobType, Level, Model, ModelFile, Status, Step};
use dreamforge_core::repository::{hash_idempotency_key, ChainStep, NewArtifact, NewModel, Repository};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Default, Serialize, Deserialize)]
struct State {
    jobs: Vec<Job>,
    steps: Vec<Step>,
    events: Vec<Event>,
    artifacts: Vec<Artifact>,
    models: Vec<Model>,
}

pub struct FileRepository {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileRepository {
    /// Load `path` if it exists, otherwise start from an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> DfResult<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DfError::internal(format!("corrupt file store at {path:?}: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(DfError::infra_unavailable(format!("file store unreadable: {e}"))),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &State) -> DfResult<()> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| DfError::internal(format!("failed to serialize file store: {e}")))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DfError::internal(format!("failed to create file store dir: {e}")))?;
        }
        std::fs::write(&self.path, bytes)
            .map_err(|e| DfError::internal(format!("failed to write file store: {e}")))
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn create_job_with_chain(
        &self,
        job_type: JobType,
        params: Value,
        idempotency_key: Option<&str>,
        chain: Vec<ChainStep>,
    ) -> DfResult<Job> {
        let mut state = self.state.lock().unwrap();

        let idempotency_key_hash = idempotency_key
            .map(hash_idempotency_key)
            .map(|hash| {
                if state.jobs.iter().any(|j| j.idempotency_key_hash == Some(hash)) {
                    Err(DfError::conflict("idempotency key already used"))
                } else {
                    Ok(hash)
                }
            })
            .transpose()?;

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type,
            status: Status::Queued,
            params,
            schema_version: 1,
            idempotency_key_hash,
            error_code: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.push(job.clone());

        for chain_step in chain {
            let now = Utc::now();
            state.steps.push(Step {
                id: Uuid::new_v4(),
                job_id: job.id,
                name: chain_step.name,
                status: Status::Queued,
                started_at: None,
                finished_at: None,
                metadata: chain_step.metadata,
                created_at: now,
                updated_at: now,
            });
        }

        self.persist(&state)?;
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> DfResult<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn get_job_with_steps(&self, id: Uuid) -> DfResult<Option<(Job, Vec<Step>)>> {
        let state = self.state.lock().unwrap();
        let Some(job) = state.jobs.iter().find(|j| j.id == id).cloned() else {
            return Ok(None);
        };
        let mut steps: Vec<Step> = state.steps.iter().filter(|s| s.job_id == id).cloned().collect();
        steps.sort_by_key(|s| s.created_at);
        Ok(Some((job, steps)))
    }

    async fn list_jobs(&self, status: Option<Status>, limit: u32) -> DfResult<Vec<Job>> {
        let limit = limit.clamp(1, 200) as usize;
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|j| std::cmp::Reverse(j.updated_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn get_step_by_name(&self, job_id: Uuid, name: &str) -> DfResult<Option<Step>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .steps
            .iter()
            .find(|s| s.job_id == job_id && s.name == name)
            .cloned())
    }

    async fn mark_step_running(&self, step_id: Uuid) -> DfResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let step = state
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| DfError::not_found("step not found"))?;
        step.status = Status::Running;
        step.started_at = Some(now);
        step.updated_at = now;
        self.persist(&state)
    }

    async fn mark_step_finished(&self, step_id: Uuid, status: Status) -> DfResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let step = state
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| DfError::not_found("step not found"))?;
        step.status = status;
        step.finished_at = Some(now);
        step.updated_at = now;
        self.persist(&state)
    }

    async fn mark_job_status(
        &self,
        job_id: Uuid,
        status: Status,
        error: Option<&DfError>,
    ) -> DfResult<()> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| DfError::not_found("job not found"))?;
        job.status = status;
        job.updated_at = now;
        if let Some(err) = error {
            job.error_code = Some(err.code().to_owned());
            job.error_message = Some(err.message().to_owned());
        }
        self.persist(&state)
    }

    async fn append_event(
        &self,
        job_id: Uuid,
        step_id: Option<Uuid>,
        code: &str,
        level: Level,
        payload: Value,
    ) -> DfResult<Event> {
        let mut state = self.state.lock().unwrap();
        let event = Event {
            id: Uuid::new_v4(),
            job_id,
            step_id,
            ts: Utc::now(),
            code: code.to_owned(),
            level,
            payload,
        };
        state.events.push(event.clone());
        self.persist(&state)?;
        Ok(event)
    }

    async fn record_artifact(
        &self,
        new_artifact: NewArtifact,
        event_payload: Value,
    ) -> DfResult<(Artifact, Event)> {
        let mut state = self.state.lock().unwrap();

        let duplicate = state.artifacts.iter().any(|a| {
            a.job_id == new_artifact.job_id
                && a.step_id == new_artifact.step_id
                && a.item_index == new_artifact.item_index
        });
        if duplicate {
            return Err(DfError::conflict("artifact (job, step, item_index) already recorded"));
        }

        let artifact = Artifact {
            id: Uuid::new_v4(),
            job_id: new_artifact.job_id,
            step_id: new_artifact.step_id,
            created_at: Utc::now(),
            format: new_artifact.format,
            width: new_artifact.width,
            height: new_artifact.height,
            seed: new_artifact.seed,
            item_index: new_artifact.item_index,
            s3_key: new_artifact.s3_key,
            checksum: new_artifact.checksum,
            metadata: new_artifact.metadata,
        };
        state.artifacts.push(artifact.clone());

        let event = Event {
            id: Uuid::new_v4(),
            job_id: artifact.job_id,
            step_id: Some(artifact.step_id),
            ts: Utc::now(),
            code: dreamforge_core::model::event_code::ARTIFACT_WRITTEN.to_owned(),
            level: Level::Info,
            payload: event_payload,
        };
        state.events.push(event.clone());

        self.persist(&state)?;
        Ok((artifact, event))
    }

    async fn list_artifacts_by_job(&self, job_id: Uuid) -> DfResult<Vec<Artifact>> {
        let state = self.state.lock().unwrap();
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .iter()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect();
        artifacts.sort_by(|a, b| a.item_index.cmp(&b.item_index).then(a.created_at.cmp(&b.created_at)));
        Ok(artifacts)
    }

    async fn iter_events(
        &self,
        job_id: Uuid,
        since_ts: Option<DateTime<Utc>>,
        tail: Option<u32>,
    ) -> DfResult<Vec<Event>> {
        let state = self.state.lock().unwrap();
        let mut events: Vec<Event> = state.events.iter().filter(|e| e.job_id == job_id).cloned().collect();
        events.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.id.cmp(&b.id)));

        if let Some(cursor) = since_ts {
            events.retain(|e| e.ts >= cursor);
            return Ok(events);
        }

        if let Some(tail) = tail {
            let tail = tail as usize;
            if events.len() > tail {
                events = events.split_off(events.len() - tail);
            }
        }
        Ok(events)
    }

    async fn list_models(&self, enabled_only: bool) -> DfResult<Vec<Model>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .models
            .iter()
            .filter(|m| !enabled_only || m.is_eligible())
            .cloned()
            .collect())
    }

    async fn get_model(&self, id: Uuid) -> DfResult<Option<Model>> {
        Ok(self.state.lock().unwrap().models.iter().find(|m| m.id == id).cloned())
    }

    async fn get_model_by_key(
        &self,
        name: &str,
        version: Option<&str>,
        kind: &str,
    ) -> DfResult<Option<Model>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .models
            .iter()
            .find(|m| m.name == name && m.version.as_deref() == version && m.kind == kind)
            .cloned())
    }

    async fn upsert_model(&self, new_model: NewModel) -> DfResult<Model> {
        let mut state = self.state.lock().unwrap();
        let now = Utc::now();

        if let Some(existing) = state
            .models
            .iter_mut()
            .find(|m| m.name == new_model.name && m.version == new_model.version && m.kind == new_model.kind)
        {
            existing.source_uri = new_model.source_uri;
            existing.checkpoint_hash = new_model.checkpoint_hash;
            existing.parameters_schema = new_model.parameters_schema;
            existing.capabilities = new_model.capabilities;
            existing.updated_at = now;
            let model = existing.clone();
            self.persist(&state)?;
            return Ok(model);
        }

        let model = Model {
            id: Uuid::new_v4(),
            name: new_model.name,
            kind: new_model.kind,
            version: new_model.version,
            checkpoint_hash: new_model.checkpoint_hash,
            source_uri: new_model.source_uri,
            local_path: None,
            installed: false,
            enabled: false,
            parameters_schema: new_model.parameters_schema,
            capabilities: new_model.capabilities,
            files: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.models.push(model.clone());
        self.persist(&state)?;
        Ok(model)
    }

    async fn mark_model_installed(&self, model_id: Uuid, local_path: &str, files: Vec<ModelFile>) -> DfResult<()> {
        let mut state = self.state.lock().unwrap();
        let model = state
            .models
            .iter_mut()
            .find(|m| m.id == model_id)
            .ok_or_else(|| DfError::not_found("model not found"))?;
        model.installed = true;
        model.local_path = Some(local_path.to_owned());
        model.files = files;
        model.updated_at = Utc::now();
        self.persist(&state)
    }

    async fn set_model_enabled(&self, model_id: Uuid, enabled: bool) -> DfResult<()> {
        let mut state = self.state.lock().unwrap();
        let model = state
            .models
            .iter_mut()
            .find(|m| m.id == model_id)
            .ok_or_else(|| DfError::not_found("model not found"))?;
        model.enabled = enabled;
        model.updated_at = Utc::now();
        self.persist(&state)
    }

    async fn get_default_model(&self, kind: &str) -> DfResult<Option<Model>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .models
            .iter()
            .filter(|m| m.kind == kind && m.is_eligible())
            .min_by_key(|m| m.created_at)
            .cloned())
    }

    async fn ping(&self) -> DfResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let repo = FileRepository::open(&path).await.unwrap();
        let job = repo
            .create_job_with_chain(
                JobType::Generate,
                serde_json::json!({ "count": 1 }),
                None,
                vec![ChainStep {
                    name: Step::GENERATE.to_owned(),
                    metadata: serde_json::json!({}),
                }],
            )
            .await
            .unwrap();

        let reopened = FileRepository::open(&path).await.unwrap();
        let found = reopened.get_job(job.id).await.unwrap();
        assert!(found.is_some());
    }
}
