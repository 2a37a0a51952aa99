//! Model install-completion (§4.6 C11 supplement): writes the `model.json`
//! sidecar the original Python implementation's
//! `modules/persistence/repos.py::mark_model_installed` leaves next to a
//! downloaded checkpoint, then records the same completion through
//! [`Repository`] so `GetDefaultModel`/model resolution (C7) sees it.
//!
//! The actual byte transfer (talking to whatever model host is configured)
//! is out of scope here, same as it's out of scope for the step executor's
//! other handlers talking to a GPU — this only closes the loop between
//! "bytes are already on disk at `local_path`" and the registry knowing it.

use std::path::Path;

use crate::error::{DfError, DfResult};
use crate::model::{Model, ModelFile};
use crate::repository::{NewModel, Repository};

/// What a `model_download` job's params carry (§3 `Model` entity fields that
/// are caller-supplied rather than derived).
pub struct InstallSpec {
    pub new_model: NewModel,
    pub local_path: String,
    pub files: Vec<ModelFile>,
}

fn write_sidecar(local_path: &str, model: &Model) -> DfResult<()> {
    let dir = Path::new(local_path);
    std::fs::create_dir_all(dir)
        .map_err(|e| DfError::internal(format!("creating model dir {local_path:?}: {e}")))?;
    let sidecar = serde_json::json!({
        "id": model.id,
        "name": model.name,
        "kind": model.kind,
        "version": model.version,
        "checkpoint_hash": model.checkpoint_hash,
        "parameters_schema": model.parameters_schema,
        "capabilities": model.capabilities,
    });
    std::fs::write(
        dir.join("model.json"),
        serde_json::to_vec_pretty(&sidecar).unwrap_or_default(),
    )
    .map_err(|e| DfError::internal(format!("writing model.json under {local_path:?}: {e}")))
}

/// Upsert the model row, write its sidecar, mark it installed, and enable
/// it — the full path from "bytes landed on disk" to "selectable by C7".
pub async fn install_model(repo: &dyn Repository, spec: InstallSpec) -> DfResult<Model> {
    let model = repo.upsert_model(spec.new_model).await?;
    write_sidecar(&spec.local_path, &model)?;
    repo.mark_model_installed(model.id, &spec.local_path, spec.files).await?;
    repo.set_model_enabled(model.id, true).await?;
    repo.get_model(model.id)
        .await?
        .ok_or_else(|| DfError::internal("model vanished immediately after install"))
}
