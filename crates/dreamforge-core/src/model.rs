//! The domain entities of §3: [`Job`], [`Step`], [`Event`], [`Artifact`], and
//! [`Model`].
//!
//! These are plain data, independent of any particular storage engine. The
//! [`crate::repository`] module defines how they are persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of work a [`Job`] performs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Generate,
    ModelDownload,
}

/// The lifecycle status shared by [`Job`] and [`Step`].
///
/// Status is monotonic along `Queued -> Running -> {Succeeded, Failed}`;
/// `Succeeded` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl Status {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// The severity of an [`Event`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// The image container format of an [`Artifact`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Png,
    Jpg,
}

impl Format {
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpg => "image/jpeg",
        }
    }
}

/// The top-level unit of work; owns an ordered sequence of [`Step`]s.
///
/// Mutated only by the step executor (C6); destroyed only by administrative
/// cascade (never by this core).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: Status,
    pub params: Value,
    pub schema_version: i32,
    pub idempotency_key_hash: Option<[u8; 32]>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named phase of a [`Job`] (`generate`, `upscale`) with its own lifecycle.
///
/// Per job, steps form an ordered sequence by `created_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    pub status: Status,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub const GENERATE: &'static str = "generate";
    pub const UPSCALE: &'static str = "upscale";
    pub const MODEL_DOWNLOAD: &'static str = "model_download";
}

/// An append-only log record used for observability and progress.
///
/// Ordered per job by `(ts, id)`; never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_id: Option<Uuid>,
    pub ts: DateTime<Utc>,
    pub code: String,
    pub level: Level,
    pub payload: Value,
}

/// Well-known [`Event::code`] values (§3 invariant: "code values include at
/// minimum...").
pub mod event_code {
    pub const STEP_START: &str = "step.start";
    pub const STEP_FINISH: &str = "step.finish";
    pub const ARTIFACT_WRITTEN: &str = "artifact.written";
    pub const ERROR: &str = "error";
    pub const JOB_FINISH: &str = "job.finish";
    pub const MODEL_SELECTED: &str = "model.selected";
}

/// A successfully produced output object (image) bound to a step and an item.
///
/// `(job_id, step_id, item_index)` is unique; never mutated after insertion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub seed: Option<i64>,
    pub item_index: u32,
    pub s3_key: String,
    pub checksum: Option<String>,
    pub metadata: Value,
}

/// A single file belonging to an installed [`Model`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelFile {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

/// A registered generation/upscale model, installed or pending install.
///
/// `(name, version, kind)` is unique. Eligible for selection only when
/// `installed && enabled`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Model {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub version: Option<String>,
    pub checkpoint_hash: Option<String>,
    pub source_uri: Option<String>,
    pub local_path: Option<String>,
    pub installed: bool,
    pub enabled: bool,
    pub parameters_schema: Value,
    pub capabilities: Vec<String>,
    pub files: Vec<ModelFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub const fn is_eligible(&self) -> bool {
        self.installed && self.enabled
    }
}
