//! Subprocess-isolated GPU execution (§5, §9 "keep it as a design feature,
//! not an implementation accident"), grounded on `_run_real`/`_child_generate`
//! in `services/worker/tasks/generate.py`: a child process does the actual
//! model call and writes image bytes to its stdout pipe; the parent reads
//! them and the child's exit guarantees device memory is released.
//!
//! This crate does not ship a model runtime, so [`SubprocessEngine`] shells
//! out to an arbitrary configured binary (the out-of-scope "GPU inference
//! kernel" of spec.md §1) and treats its stdout as the full contract.

use std::process::Stdio;

use async_trait::async_trait;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::ports::{Engine, GenerateItem, GenerateRequest, UpscaleRequest, UpscaleResult, Upscaler};
use image::GenericImageView;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Pipe `stdin` to `binary` and collect its stdout, the shared shape behind
/// both [`SubprocessEngine`] and [`SubprocessUpscaler`].
async fn run_child(binary: &str, stdin_payload: &[u8]) -> DfResult<Vec<u8>> {
    let mut child = Command::new(binary)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| DfError::internal(format!("failed to spawn subprocess: {e}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| DfError::internal("subprocess stdin unavailable"))?;
    stdin
        .write_all(stdin_payload)
        .await
        .map_err(|e| DfError::internal(format!("failed to write subprocess stdin: {e}")))?;
    drop(stdin);

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| DfError::internal(format!("subprocess failed: {e}")))?;

    post_run_cleanup();

    if !output.status.success() {
        return Err(DfError::internal(format!(
            "subprocess exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(output.stdout)
}

/// Runs one child process per generated item, piping a JSON request on
/// stdin and reading raw image bytes back from stdout.
pub struct SubprocessEngine {
    binary: String,
}

impl SubprocessEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn generate_one(&self, req: &GenerateRequest, seed: i64) -> DfResult<Vec<u8>> {
        let payload = serde_json::json!({
            "prompt": req.prompt,
            "width": req.width,
            "height": req.height,
            "count": 1,
            "seed": seed,
            "model_path": req.model.as_ref().and_then(|m| m.local_path.clone()),
        });
        run_child(
            &self.binary,
            serde_json::to_string(&payload).unwrap_or_default().as_bytes(),
        )
        .await
    }
}

#[async_trait]
impl Engine for SubprocessEngine {
    async fn generate(&self, req: GenerateRequest) -> DfResult<Vec<GenerateItem>> {
        let seeds = crate::fake::seeds_for(req.count, req.seed);
        let mut items = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let bytes = self.generate_one(&req, seed).await?;
            items.push(GenerateItem {
                bytes,
                width: req.width,
                height: req.height,
                seed,
                format: req.format,
            });
        }
        Ok(items)
    }

    fn kind(&self) -> &'static str {
        "subprocess"
    }
}

/// One real implementation family behind [`crate::PolicyUpscaler`]: shells
/// out to a configured binary, base64-encoding the input image alongside
/// the scale request on stdin, grounded on the same `_child_upscale_bytes`
/// subprocess pattern `policy.rs` documents for the diffusion/gan split.
pub struct SubprocessUpscaler {
    binary: String,
    kind: &'static str,
}

impl SubprocessUpscaler {
    pub fn new(binary: impl Into<String>, kind: &'static str) -> Self {
        Self { binary: binary.into(), kind }
    }
}

#[async_trait]
impl Upscaler for SubprocessUpscaler {
    async fn upscale(&self, req: UpscaleRequest) -> DfResult<UpscaleResult> {
        use base64::Engine as _;

        let payload = serde_json::json!({
            "input_b64": base64::engine::general_purpose::STANDARD.encode(&req.input),
            "input_format": req.input_format,
            "scale_factor": req.scale_factor,
            "model_path": req.model.as_ref().and_then(|m| m.local_path.clone()),
        });
        let stdout = run_child(
            &self.binary,
            serde_json::to_string(&payload).unwrap_or_default().as_bytes(),
        )
        .await?;

        let decoded = image::load_from_memory(&stdout)
            .map_err(|e| DfError::internal(format!("upscaler subprocess returned undecodable image bytes: {e}")))?;

        Ok(UpscaleResult {
            width: decoded.width(),
            height: decoded.height(),
            bytes: stdout,
            format: req.input_format,
            scale_factor_used: req.scale_factor,
        })
    }

    fn kind(&self) -> &'static str {
        self.kind
    }
}

/// Best-effort CUDA cache clear on the parent side after the child exits
/// (§5: "A best-effort CUDA-cache clear is performed post-subprocess"). This
/// crate never touches real CUDA (§1 Non-goals: GPU memory is the engine
/// layer's concern), so the hook is a no-op placeholder a real GPU engine
/// crate overrides.
fn post_run_cleanup() {
    tracing::debug!("engine subprocess exited; parent-side cleanup hook invoked");
}
