//! The persistence repository contract (C1, §4.1).
//!
//! `Repository` is a capability set over typed CRUD, not a query builder —
//! each operation is a method, and each call takes effect atomically
//! (commit-or-rollback as a unit). Where §4.5 requires an artifact insert and
//! its `artifact.written` event to be committed together, that is expressed
//! as a single compound method ([`Repository::record_artifact`]) rather than
//! a leaked multi-call transaction handle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DfError, DfResult};
use crate::model::{Artifact, Event, Job, JobType, Level, Model, ModelFile, Status, Step};

/// Fields needed to insert one [`Artifact`] row (§4.1 `InsertArtifact`).
#[derive(Clone, Debug)]
pub struct NewArtifact {
    pub job_id: Uuid,
    pub step_id: Uuid,
    pub format: crate::model::Format,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    pub item_index: u32,
    pub s3_key: String,
    pub checksum: Option<String>,
    pub metadata: Value,
}

/// Fields needed to upsert a [`Model`] row (§4.1 `UpsertModel`).
#[derive(Clone, Debug)]
pub struct NewModel {
    pub name: String,
    pub kind: String,
    pub version: Option<String>,
    pub source_uri: Option<String>,
    pub checkpoint_hash: Option<String>,
    pub parameters_schema: Value,
    pub capabilities: Vec<String>,
}

/// One element of a job's step chain, as recorded by [`Repository::create_job_with_chain`].
#[derive(Clone, Debug)]
pub struct ChainStep {
    pub name: String,
    pub metadata: Value,
}

/// The persistence repository capability set (§4.1).
///
/// Implementations must guarantee that every method either commits its full
/// write set or rolls back entirely; read operations observe only committed
/// data.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_job_with_chain(
        &self,
        job_type: JobType,
        params: Value,
        idempotency_key: Option<&str>,
        chain: Vec<ChainStep>,
    ) -> DfResult<Job>;

    async fn get_job(&self, id: Uuid) -> DfResult<Option<Job>>;

    async fn get_job_with_steps(&self, id: Uuid) -> DfResult<Option<(Job, Vec<Step>)>>;

    async fn list_jobs(&self, status: Option<Status>, limit: u32) -> DfResult<Vec<Job>>;

    async fn get_step_by_name(&self, job_id: Uuid, name: &str) -> DfResult<Option<Step>>;

    async fn mark_step_running(&self, step_id: Uuid) -> DfResult<()>;

    async fn mark_step_finished(&self, step_id: Uuid, status: Status) -> DfResult<()>;

    async fn mark_job_status(
        &self,
        job_id: Uuid,
        status: Status,
        error: Option<&DfError>,
    ) -> DfResult<()>;

    async fn append_event(
        &self,
        job_id: Uuid,
        step_id: Option<Uuid>,
        code: &str,
        level: Level,
        payload: Value,
    ) -> DfResult<Event>;

    /// Insert an [`Artifact`] and append its `artifact.written` [`Event`] in
    /// one atomic unit (§4.5: "Artifact insertion precedes the
    /// `artifact.written` event (same transaction)").
    async fn record_artifact(
        &self,
        artifact: NewArtifact,
        event_payload: Value,
    ) -> DfResult<(Artifact, Event)>;

    async fn list_artifacts_by_job(&self, job_id: Uuid) -> DfResult<Vec<Artifact>>;

    async fn iter_events(
        &self,
        job_id: Uuid,
        since_ts: Option<DateTime<Utc>>,
        tail: Option<u32>,
    ) -> DfResult<Vec<Event>>;

    async fn list_models(&self, enabled_only: bool) -> DfResult<Vec<Model>>;

    async fn get_model(&self, id: Uuid) -> DfResult<Option<Model>>;

    async fn get_model_by_key(
        &self,
        name: &str,
        version: Option<&str>,
        kind: &str,
    ) -> DfResult<Option<Model>>;

    async fn upsert_model(&self, new_model: NewModel) -> DfResult<Model>;

    async fn mark_model_installed(
        &self,
        model_id: Uuid,
        local_path: &str,
        files: Vec<ModelFile>,
    ) -> DfResult<()>;

    async fn set_model_enabled(&self, model_id: Uuid, enabled: bool) -> DfResult<()>;

    async fn get_default_model(&self, kind: &str) -> DfResult<Option<Model>>;

    /// A cheap connectivity probe for `GET /readyz` (§4.9, §6 `DF_READY_CHECKS`).
    async fn ping(&self) -> DfResult<()>;
}

/// Hash an idempotency key the way §4.1 requires (SHA-256, stored as 32
/// bytes, unique when present).
pub fn hash_idempotency_key(key: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}
