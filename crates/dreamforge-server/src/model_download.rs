//! The `model_download` step handler (§4.6 C11 supplement): turns a
//! model-download job's params into an
//! [`dreamforge_core::model_installer::InstallSpec`] and installs it.
//! Produces no [`crate::executor::ItemOutput`]s — a model isn't an artifact.

use std::sync::Arc;

use dreamforge_core::error::DfResult;
use dreamforge_core::model::{Job, ModelFile};
use dreamforge_core::model_installer::{install_model, InstallSpec};
use dreamforge_core::repository::{NewModel, Repository};

pub(crate) struct ModelDownloadHandler {
    pub repo: Arc<dyn Repository>,
}

fn files_from_params(params: &serde_json::Value) -> Vec<ModelFile> {
    params["files"]
        .as_array()
        .map(|files| {
            files
                .iter()
                .filter_map(|f| {
                    Some(ModelFile {
                        path: f["path"].as_str()?.to_owned(),
                        sha256: f["sha256"].as_str()?.to_owned(),
                        size: f["size"].as_u64()?,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ModelDownloadHandler {
    pub(crate) async fn run(&self, job: &Job) -> DfResult<()> {
        let params = &job.params;
        let new_model = NewModel {
            name: params["name"].as_str().unwrap_or_default().to_owned(),
            kind: params["kind"].as_str().unwrap_or("sdxl-checkpoint").to_owned(),
            version: params["version"].as_str().map(str::to_owned),
            source_uri: params["source_uri"].as_str().map(str::to_owned),
            checkpoint_hash: params["checkpoint_hash"].as_str().map(str::to_owned),
            parameters_schema: params["parameters_schema"].clone(),
            capabilities: params["capabilities"]
                .as_array()
                .map(|caps| caps.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
                .unwrap_or_default(),
        };
        let local_path = params["local_path"].as_str().unwrap_or_default().to_owned();
        let files = files_from_params(params);

        install_model(
            self.repo.as_ref(),
            InstallSpec {
                new_model,
                local_path,
                files,
            },
        )
        .await?;
        Ok(())
    }
}
