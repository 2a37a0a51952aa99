//! The step executor framework (§4.5 C6): for one step, mark running,
//! invoke the step-specific handler, record artifacts/events, mark
//! terminal, chain to the next step. Generalizes the teacher's
//! `Worker::run_single_job` (`src/server/src/worker.rs`, one `transaction`
//! wrapping find-next/run/mark-failed) from a single flat job to an ordered
//! step chain, and from Diesel's sync transaction closure to async
//! repository calls.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::keys::artifact_key;
use dreamforge_core::model::{event_code, Format, Job, Level, Status, Step};
use dreamforge_core::ports::{Engine, JobHandler, ObjectStore, Upscaler};
use dreamforge_core::repository::{NewArtifact, Repository};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::generate::GenerateHandler;
use crate::model_download::ModelDownloadHandler;
use crate::upscale::UpscaleHandler;

/// One produced image handed back by a step handler, ready for the executor
/// to upload and record. `item_index` is carried explicitly rather than
/// inferred from vector position so a handler (e.g. upscale, which reads
/// artifacts that may not start at 0) never has to rely on ordering luck.
pub(crate) struct ItemOutput {
    pub item_index: u32,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    pub format: Format,
    pub metadata: Value,
}

pub struct StepExecutor {
    repo: Arc<dyn Repository>,
    store: Arc<dyn ObjectStore>,
    artifact_key_prefix: String,
    generate: GenerateHandler,
    upscale: UpscaleHandler,
    model_download: ModelDownloadHandler,
}

impl StepExecutor {
    pub fn new(
        repo: Arc<dyn Repository>,
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn Engine>,
        upscaler: Arc<dyn Upscaler>,
        artifact_key_prefix: String,
        model_fallback_path: Option<String>,
    ) -> Self {
        Self {
            generate: GenerateHandler {
                repo: repo.clone(),
                engine,
                model_fallback_path,
            },
            upscale: UpscaleHandler {
                repo: repo.clone(),
                store: store.clone(),
                upscaler,
            },
            model_download: ModelDownloadHandler { repo: repo.clone() },
            repo,
            store,
            artifact_key_prefix,
        }
    }

    /// Record a failure against both the step and the job (§4.5 step 3): an
    /// `error` event, the step marked `failed`, the job marked `failed`
    /// with the error's stable code and message.
    async fn fail(&self, job: &Job, step: &Step, err: &DfError) -> DfResult<()> {
        self.repo
            .append_event(job.id, Some(step.id), event_code::ERROR, Level::Error, err.to_json())
            .await?;
        self.repo.mark_step_finished(step.id, Status::Failed).await?;
        self.repo.mark_job_status(job.id, Status::Failed, Some(err)).await?;
        metrics::counter!("jobs_failed_total").increment(1);
        Ok(())
    }

    /// Run one step to a terminal state. Returns `Ok(true)` if the step
    /// succeeded (chain should continue), `Ok(false)` if it failed (chain
    /// stops here, already recorded). Only a repository/transport failure
    /// encountered while trying to operate the executor itself propagates
    /// as `Err` — not a handler's own business-logic failure.
    async fn run_step(&self, job: &Job, step: &Step) -> DfResult<bool> {
        self.repo.mark_step_running(step.id).await?;
        self.repo.mark_job_status(job.id, Status::Running, None).await?;
        self.repo
            .append_event(
                job.id,
                Some(step.id),
                event_code::STEP_START,
                Level::Info,
                json!({ "step": step.name }),
            )
            .await?;
        metrics::gauge!("steps_running").increment(1.0);

        let items = match self.dispatch(job, step).await {
            Ok(items) => items,
            Err(err) => {
                metrics::gauge!("steps_running").decrement(1.0);
                self.fail(job, step, &err).await?;
                return Ok(false);
            }
        };

        for item in items {
            if let Err(err) = self.record_item(job, step, item).await {
                metrics::gauge!("steps_running").decrement(1.0);
                self.fail(job, step, &err).await?;
                return Ok(false);
            }
        }

        self.repo.mark_step_finished(step.id, Status::Succeeded).await?;
        self.repo
            .append_event(
                job.id,
                Some(step.id),
                event_code::STEP_FINISH,
                Level::Info,
                json!({ "step": step.name }),
            )
            .await?;
        metrics::gauge!("steps_running").decrement(1.0);
        Ok(true)
    }

    async fn dispatch(&self, job: &Job, step: &Step) -> DfResult<Vec<ItemOutput>> {
        match step.name.as_str() {
            Step::GENERATE => self.generate.run(job, step).await,
            Step::UPSCALE => self.upscale.run(job, step).await,
            Step::MODEL_DOWNLOAD => {
                self.model_download.run(job).await?;
                Ok(vec![])
            }
            other => Err(DfError::internal(format!("no handler registered for step {other:?}"))),
        }
    }

    /// Upload the item's bytes, then insert its [`dreamforge_core::model::Artifact`]
    /// and `artifact.written` event in one atomic unit (§4.5 invariant:
    /// "Artifact insertion precedes the event, same transaction").
    async fn record_item(&self, job: &Job, step: &Step, item: ItemOutput) -> DfResult<()> {
        let created_at = Utc::now();
        let key = artifact_key(
            &self.artifact_key_prefix,
            job.id,
            &step.name,
            created_at,
            item.item_index,
            item.width,
            item.height,
            item.seed,
            item.format.extension(),
        );
        let checksum = self.store.put(&key, item.bytes, item.format.content_type()).await?;

        let mut event_payload = json!({
            "s3_key": key,
            "seed": item.seed,
            "item_index": item.item_index,
        });
        if let (Value::Object(event_map), Value::Object(extra)) = (&mut event_payload, &item.metadata) {
            for (k, v) in extra {
                event_map.insert(k.clone(), v.clone());
            }
        }

        self.repo
            .record_artifact(
                NewArtifact {
                    job_id: job.id,
                    step_id: step.id,
                    format: item.format,
                    width: item.width,
                    height: item.height,
                    seed: item.seed,
                    item_index: item.item_index,
                    s3_key: key,
                    checksum: Some(checksum),
                    metadata: item.metadata,
                },
                event_payload,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for StepExecutor {
    async fn handle(&self, job_id: Uuid) -> DfResult<()> {
        let (job, steps) = self
            .repo
            .get_job_with_steps(job_id)
            .await?
            .ok_or_else(|| DfError::not_found(format!("job {job_id} not found")))?;

        for step in &steps {
            if step.status.is_terminal() {
                continue;
            }
            if !self.run_step(&job, step).await? {
                return Ok(());
            }
        }

        self.repo.mark_job_status(job_id, Status::Succeeded, None).await?;
        self.repo
            .append_event(job_id, None, event_code::JOB_FINISH, Level::Info, json!({}))
            .await?;
        metrics::counter!("jobs_succeeded_total").increment(1);
        Ok(())
    }
}
