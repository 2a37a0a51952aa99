//! Capability traits for the engine boundary (§4.2 `Engine`/`Upscaler`),
//! object storage (§4.6), and job dispatch (§4.3 `Queue`/`WorkerPool`).
//!
//! These are the seams the redesign note in §8 calls for: GPU work and
//! object storage are both kept behind a trait so the server and worker can
//! be exercised against fakes, the way [`crate::test_support`] does.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DfResult;
use crate::model::Format;

/// A reference to an installed model, resolved by the caller before
/// invoking [`Engine`] or [`Upscaler`] (§4.4 model resolution order).
#[derive(Clone, Debug)]
pub struct ModelRef {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub local_path: Option<String>,
}

/// Input to one `generate` step invocation (§4.7 C7).
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub model: Option<ModelRef>,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub count: u32,
    pub seed: Option<i64>,
    pub format: Format,
}

/// One generated image, with the seed actually used (§4.7: seed is echoed
/// per item, not just per request, since an absent seed is drawn fresh for
/// each item).
#[derive(Clone, Debug)]
pub struct GenerateItem {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub seed: i64,
    pub format: Format,
}

/// The image generation capability (§4.2).
///
/// An implementation may run in-process (the deterministic fake used in
/// tests) or isolate the actual model call in a subprocess (§8: "subprocess
/// isolation as a first-class design, not an afterthought").
#[async_trait]
pub trait Engine: Send + Sync {
    async fn generate(&self, req: GenerateRequest) -> DfResult<Vec<GenerateItem>>;

    /// The `model.selected` event payload's `engine` field (§3 event codes).
    fn kind(&self) -> &'static str;
}

/// Input to one `upscale` step invocation (§4.8 C8).
#[derive(Clone, Debug)]
pub struct UpscaleRequest {
    pub model: Option<ModelRef>,
    pub input: Vec<u8>,
    pub input_format: Format,
    pub scale_factor: u32,
    /// `auto` | `diffusion` | `gan`, as validated at submission (§4.3).
    pub impl_name: Option<String>,
    pub strict_scale: bool,
}

/// The result of one upscale call (§4.8: the implementation's native scale
/// factor may differ from the request when `strict_scale` is false).
#[derive(Clone, Debug)]
pub struct UpscaleResult {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub scale_factor_used: u32,
}

/// The image upscaling capability (§4.2), selected polymorphically between
/// real implementations and a `Fallback` per §8's sum-type redesign note.
#[async_trait]
pub trait Upscaler: Send + Sync {
    async fn upscale(&self, req: UpscaleRequest) -> DfResult<UpscaleResult>;

    fn kind(&self) -> &'static str;
}

/// Object storage (§4.6): artifact bytes go in, a presigned GET URL comes
/// out. Implementations resolve the internal/public endpoint split
/// themselves; callers never see raw bucket credentials.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under `key`, returning a hex SHA-256 checksum.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> DfResult<String>;

    /// Fetch previously-written bytes back (§4.8: the upscale handler reads
    /// the preceding generate step's output before transforming it).
    async fn get(&self, key: &str) -> DfResult<Vec<u8>>;

    /// A time-limited GET URL for `key`, valid for `ttl_secs` (clamped to
    /// [300, 86400] by the caller per §6 `DF_PRESIGN_EXPIRES_S`).
    async fn presign_get(&self, key: &str, ttl_secs: u64) -> DfResult<String>;

    /// A cheap connectivity probe for `GET /readyz` (§4.9, §6 `DF_READY_CHECKS`).
    async fn ping(&self) -> DfResult<()>;
}

/// Drives one job through the step executor (C6) to a terminal state. The
/// queue/worker layer (C5) is generic over this so it never needs to know
/// about `Repository`/`Engine`/`ObjectStore` — only `dreamforge-server`'s
/// composition root does.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_id: Uuid) -> DfResult<()>;
}

/// Job dispatch (§4.3): decouples job submission (C4) from execution (C6).
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> DfResult<()>;
}

/// Consumes a [`Queue`] and drives jobs through the step executor until
/// told to stop (§4.3, §8: channel-based replacement for poll-the-database).
#[async_trait]
pub trait WorkerPool: Send + Sync {
    async fn run(&self) -> DfResult<()>;
}
