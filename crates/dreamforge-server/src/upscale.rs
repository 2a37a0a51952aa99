//! The upscale step handler (§4.7 C8): reads the preceding generate step's
//! artifacts, runs the configured upscaler over each, and hands the step
//! executor back derived images with the same `item_index`/`seed` so a
//! given item still names the same logical image across steps.

use std::sync::Arc;

use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::model::{Job, Step};
use dreamforge_core::ports::{ObjectStore, UpscaleRequest, Upscaler};
use dreamforge_core::repository::Repository;
use serde_json::json;

use crate::executor::ItemOutput;

pub(crate) struct UpscaleHandler {
    pub repo: Arc<dyn Repository>,
    pub store: Arc<dyn ObjectStore>,
    pub upscaler: Arc<dyn Upscaler>,
}

impl UpscaleHandler {
    pub(crate) async fn run(&self, job: &Job, step: &Step) -> DfResult<Vec<ItemOutput>> {
        let scale = step.metadata["scale"].as_u64().unwrap_or(2) as u32;
        let impl_name = step.metadata["impl"].as_str().map(str::to_owned);
        let strict_scale = step.metadata["strict_scale"].as_bool().unwrap_or(false);

        let generate_step = self
            .repo
            .get_step_by_name(job.id, Step::GENERATE)
            .await?
            .ok_or_else(|| DfError::internal("upscale step ran without a preceding generate step"))?;

        let source_artifacts: Vec<_> = self
            .repo
            .list_artifacts_by_job(job.id)
            .await?
            .into_iter()
            .filter(|a| a.step_id == generate_step.id)
            .collect();

        let mut outputs = Vec::with_capacity(source_artifacts.len());
        for artifact in source_artifacts {
            let bytes = self.store.get(&artifact.s3_key).await?;
            let result = self
                .upscaler
                .upscale(UpscaleRequest {
                    model: None,
                    input: bytes,
                    input_format: artifact.format,
                    scale_factor: scale,
                    impl_name: impl_name.clone(),
                    strict_scale,
                })
                .await?;

            outputs.push(ItemOutput {
                item_index: artifact.item_index,
                bytes: result.bytes,
                width: result.width,
                height: result.height,
                seed: artifact.seed,
                format: result.format,
                metadata: json!({
                    "scale": result.scale_factor_used,
                    "impl": impl_name,
                    "strict_scale": strict_scale,
                }),
            });
        }
        Ok(outputs)
    }
}
