//! The composition root (§9: "provide an explicit `App` composition root
//! owning lifecycles, passed to handlers", replacing the teacher's
//! module-level `lazy_static!`/global `Context` pattern). Every capability a
//! route or the step executor needs lives behind a trait object here, so
//! tests can swap in [`dreamforge_core::test_support::InMemoryRepository`]
//! and `dreamforge_store::LocalDiskStore` without touching route code.

use std::sync::Arc;

use dreamforge_core::config::Config;
use dreamforge_core::ports::{Engine, ObjectStore, Queue, Upscaler};
use dreamforge_core::repository::Repository;

use crate::executor::StepExecutor;

/// Shared application state, cloned (cheaply, via `Arc`) into every route.
#[derive(Clone)]
pub struct App {
    pub repo: Arc<dyn Repository>,
    pub store: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn Queue>,
    pub config: Arc<Config>,
}

impl App {
    pub fn new(
        repo: Arc<dyn Repository>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn Queue>,
        config: Config,
    ) -> Self {
        Self {
            repo,
            store,
            queue,
            config: Arc::new(config),
        }
    }
}

/// Build the [`StepExecutor`] both `dreamforge-server`'s eager path and
/// `dreamforge-worker`'s pool consume — the one place `Engine`/`Upscaler`
/// selection happens, kept out of `App` itself since the HTTP surface never
/// touches the engine directly (only the executor does).
pub fn build_executor(
    repo: Arc<dyn Repository>,
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn Engine>,
    upscaler: Arc<dyn Upscaler>,
    config: &Config,
) -> StepExecutor {
    StepExecutor::new(
        repo,
        store,
        engine,
        upscaler,
        config.artifact_key_prefix.clone(),
        config.model_fallback_path.clone(),
    )
}
