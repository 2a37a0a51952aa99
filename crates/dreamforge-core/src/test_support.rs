//! An in-memory [`Repository`] used by integration tests across the
//! workspace (§1 "Test tooling"), the same way the teacher's
//! `automaat-core::Context` lets a `Processor` run without a real shell.
//!
//! Mirrors the semantics of `dreamforge-postgres` exactly — same ordering,
//! same uniqueness errors — just backed by a `Mutex` instead of a pool, so
//! S1-S6 (§8 of spec.md) can run without a live Postgres.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DfError, DfResult};
use crate::model::{Artifact, Event, Job, JobType, Level, Model, ModelFile, Status, Step};
use crate::repository::{ChainStep, NewArtifact, NewModel, Repository};

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    steps: Vec<Step>,
    events: Vec<Event>,
    artifacts: Vec<Artifact>,
    models: Vec<Model>,
}

/// An in-process [`Repository`] backed by a single [`Mutex`]. Not for
/// production: every call locks the whole store, which is fine for tests
/// and fatal for throughput.
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_job_with_chain(
        &self,
        job_type: JobType,
        params: Value,
        idempotency_key: Option<&str>,
        chain: Vec<ChainStep>,
    ) -> DfResult<Job> {
        let mut state = self.state.lock().unwrap();

        let idempotency_key_hash = idempotency_key
            .map(crate::repository::hash_idempotency_key)
            .map(|hash| {
                if state
                    .jobs
                    .iter()
                    .any(|j| j.idempotency_key_hash == Some(hash))
                {
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
        Ok(())
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
        Ok(())
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
        Ok(())
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
            code: crate::model::event_code::ARTIFACT_WRITTEN.to_owned(),
            level: Level::Info,
            payload: event_payload,
        };
        state.events.push(event.clone());

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
        artifacts.sort_by(|a, b| {
            a.item_index
                .cmp(&b.item_index)
                .then(a.created_at.cmp(&b.created_at))
        });
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

        if let Some(existing) = state.models.iter_mut().find(|m| {
            m.name == new_model.name
                && m.version == new_model.version
                && m.kind == new_model.kind
        }) {
            existing.source_uri = new_model.source_uri;
            existing.checkpoint_hash = new_model.checkpoint_hash;
            existing.parameters_schema = new_model.parameters_schema;
            existing.capabilities = new_model.capabilities;
            existing.updated_at = now;
            return Ok(existing.clone());
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
        Ok(model)
    }

    async fn mark_model_installed(
        &self,
        model_id: Uuid,
        local_path: &str,
        files: Vec<ModelFile>,
    ) -> DfResult<()> {
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
        Ok(())
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
        Ok(())
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
    async fn rejects_duplicate_idempotency_key() {
        let repo = InMemoryRepository::new();
        repo.create_job_with_chain(
            JobType::Generate,
            serde_json::json!({}),
            Some("key-1"),
            vec![ChainStep {
                name: Step::GENERATE.to_owned(),
                metadata: serde_json::json!({}),
            }],
        )
        .await
        .unwrap();

        let result = repo
            .create_job_with_chain(
                JobType::Generate,
                serde_json::json!({}),
                Some("key-1"),
                vec![ChainStep {
                    name: Step::GENERATE.to_owned(),
                    metadata: serde_json::json!({}),
                }],
            )
            .await;

        assert!(matches!(result, Err(DfError::Conflict { .. })));
    }

    #[tokio::test]
    async fn iter_events_since_cursor_is_ascending() {
        let repo = InMemoryRepository::new();
        let job_id = Uuid::new_v4();
        repo.append_event(job_id, None, "a", Level::Info, serde_json::json!({}))
            .await
            .unwrap();
        let cursor = Utc::now();
        repo.append_event(job_id, None, "b", Level::Info, serde_json::json!({}))
            .await
            .unwrap();

        let events = repo.iter_events(job_id, Some(cursor), None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "b");
    }
}
