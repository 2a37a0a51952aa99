//! Shared composition helpers (§9 "explicit `App` composition root"): both
//! the `dreamforge-server` and `dreamforge-worker` binaries resolve the same
//! capability implementations from the same [`Config`], so a job behaves
//! identically no matter which binary runs it.

use std::sync::Arc;

use dreamforge_core::config::Config;
use dreamforge_core::error::DfResult;
use dreamforge_core::ports::{Engine, ObjectStore, Upscaler};
use dreamforge_core::repository::Repository;
use dreamforge_engine::{FakeEngine, FakeUpscaler, PolicyUpscaler, SubprocessEngine, SubprocessUpscaler};
use dreamforge_store::{LocalDiskStore, S3Store};

pub async fn build_repository(config: &Config) -> DfResult<Arc<dyn Repository>> {
    match &config.db_url {
        Some(url) => {
            tracing::info!("connecting to postgres");
            let pool = dreamforge_postgres::connect(url).await?;
            dreamforge_postgres::run_migrations(&pool).await?;
            Ok(Arc::new(dreamforge_postgres::PgRepository::new(pool)))
        }
        None => {
            tracing::warn!(path = %config.db_file_path, "DF_DB_URL unset, falling back to local file-based store");
            Ok(Arc::new(dreamforge_postgres::FileRepository::open(&config.db_file_path).await?))
        }
    }
}

pub fn build_store(config: &Config) -> DfResult<Arc<dyn ObjectStore>> {
    match &config.s3 {
        Some(s3) => {
            tracing::info!(endpoint = %s3.endpoint, "using object store");
            Ok(Arc::new(S3Store::new(s3)?))
        }
        None => {
            tracing::warn!("no S3 endpoint configured, falling back to local disk store");
            Ok(Arc::new(LocalDiskStore::new("./dreamforge-data/objects", "http://localhost:8080/objects")))
        }
    }
}

/// Resolve the real [`Engine`], falling back to the deterministic fake when
/// no subprocess binary is configured (§8: the fake is a first-class mode,
/// not just a test fixture).
pub fn build_engine(config: &Config) -> Arc<dyn Engine> {
    match &config.engine_bin {
        Some(bin) => Arc::new(SubprocessEngine::new(bin.clone())),
        None => {
            tracing::warn!("DF_ENGINE_BIN unset, using the deterministic fake engine");
            Arc::new(FakeEngine)
        }
    }
}

/// Resolve the real [`Upscaler`], wrapping both subprocess binaries in
/// [`PolicyUpscaler`] for the `auto`/fallback-once policy (§4.7) when both
/// are configured, falling back to the fake otherwise.
pub fn build_upscaler(config: &Config) -> Arc<dyn Upscaler> {
    match (&config.upscaler_diffusion_bin, &config.upscaler_gan_bin) {
        (Some(diffusion), Some(gan)) => Arc::new(PolicyUpscaler::new(
            SubprocessUpscaler::new(diffusion.clone(), "diffusion"),
            SubprocessUpscaler::new(gan.clone(), "gan"),
        )),
        _ => {
            tracing::warn!("upscaler subprocess binaries unset, using the deterministic fake upscaler");
            Arc::new(FakeUpscaler)
        }
    }
}
