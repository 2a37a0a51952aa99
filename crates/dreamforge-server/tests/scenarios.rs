//! End-to-end scenarios (§8 of spec.md): a job posted against the in-memory
//! repository, the local disk store, and the deterministic fakes, run to a
//! terminal state through the exact same [`StepExecutor`]/[`EagerQueue`] path
//! production uses in `DF_CELERY_EAGER=true` mode.

use std::collections::HashSet;
use std::sync::Arc;

use dreamforge_core::model::{event_code, JobType, Status};
use dreamforge_core::ports::Queue;
use dreamforge_core::repository::Repository;
use dreamforge_core::test_support::InMemoryRepository;
use dreamforge_engine::{FakeEngine, FakeUpscaler};
use dreamforge_queue::EagerQueue;
use dreamforge_server::{build_executor, StepExecutor};
use dreamforge_server::validation::{ChainSpec, CreateJobRequest, UpscaleSpec};
use dreamforge_store::LocalDiskStore;

fn base_request() -> CreateJobRequest {
    CreateJobRequest {
        r#type: "generate".into(),
        prompt: "test".into(),
        negative_prompt: None,
        width: 64,
        height: 64,
        steps: 2,
        guidance: 1.0,
        scheduler: None,
        format: "png".into(),
        embed_metadata: true,
        seed: None,
        count: 1,
        model_id: None,
        chain: None,
    }
}

/// Everything S1-S6 need: an in-memory repository, a tempdir-backed disk
/// store, and an eager queue running the real [`StepExecutor`] with the fake
/// engine/upscaler — the exact composition root `dreamforge-server` builds
/// in-process, minus HTTP.
struct Harness {
    repo: Arc<InMemoryRepository>,
    queue: EagerQueue<StepExecutor>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let repo: Arc<InMemoryRepository> = Arc::new(InMemoryRepository::new());
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalDiskStore::new(tmp.path(), "http://localhost:8080/objects"));
        let executor = Arc::new(build_executor(
            repo.clone() as Arc<dyn Repository>,
            store,
            Arc::new(FakeEngine),
            Arc::new(FakeUpscaler),
            &test_config(),
        ));
        let queue = EagerQueue::new(executor);
        Self { repo, queue, _tmp: tmp }
    }

    async fn submit(&self, req: CreateJobRequest) -> uuid::Uuid {
        let validated = req.validate().expect("request should be valid");
        let job = self
            .repo
            .create_job_with_chain(JobType::Generate, validated.params, None, validated.chain)
            .await
            .unwrap();
        self.queue.enqueue(job.id).await.unwrap();
        job.id
    }
}

/// A minimal [`dreamforge_core::config::Config`] good enough for
/// [`build_executor`], which only reads `artifact_key_prefix`/`model_fallback_path`.
fn test_config() -> dreamforge_core::config::Config {
    dreamforge_core::config::Config {
        bind: "0.0.0.0:0".into(),
        db_url: None,
        db_file_path: "./dreamforge-data/db.json".into(),
        redis_url: None,
        celery_eager: true,
        worker_concurrency: 1,
        s3: None,
        sse_poll: std::time::Duration::from_millis(10),
        sse_heartbeat: std::time::Duration::from_secs(15),
        logs_tail_default: 100,
        logs_tail_max: 2000,
        ready_checks: dreamforge_core::config::ReadyChecks::default(),
        model_fallback_path: None,
        artifact_key_prefix: "dreamforge/test".into(),
        engine_bin: None,
        upscaler_diffusion_bin: None,
        upscaler_gan_bin: None,
    }
}

// S1: single success.
#[tokio::test]
async fn s1_single_success() {
    let h = Harness::new();
    let job_id = h.submit(base_request()).await;

    let job = h.repo.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, Status::Succeeded);

    let artifacts = h.repo.list_artifacts_by_job(job_id).await.unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].item_index, 0);
    assert_eq!(artifacts[0].format.extension(), "png");
    assert!(artifacts[0].s3_key.starts_with("dreamforge/"));

    let events = h.repo.iter_events(job_id, None, None).await.unwrap();
    let codes: Vec<&str> = events.iter().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(&event_code::STEP_START));
    assert!(codes.contains(&event_code::ARTIFACT_WRITTEN));
    assert!(codes.contains(&event_code::JOB_FINISH));
}

// S2: batch of 5.
#[tokio::test]
async fn s2_batch_of_five() {
    let h = Harness::new();
    let mut req = base_request();
    req.count = 5;
    let job_id = h.submit(req).await;

    let artifacts = h.repo.list_artifacts_by_job(job_id).await.unwrap();
    assert_eq!(artifacts.len(), 5);

    let indices: HashSet<u32> = artifacts.iter().map(|a| a.item_index).collect();
    assert_eq!(indices, (0..5).collect());

    for (i, artifact) in artifacts.iter().enumerate() {
        assert!(artifact.s3_key.contains(&format!("_{i}_")));
    }

    let seeds: HashSet<Option<i64>> = artifacts.iter().map(|a| a.seed).collect();
    assert!(seeds.len() >= 2);
}

// S3: seeded batch still randomizes per item.
#[tokio::test]
async fn s3_seeded_batch_still_randomizes() {
    let h = Harness::new();
    let mut req = base_request();
    req.count = 3;
    req.seed = Some(123_456);
    let job_id = h.submit(req).await;

    let artifacts = h.repo.list_artifacts_by_job(job_id).await.unwrap();
    assert_eq!(artifacts.len(), 3);
    let seeds: HashSet<Option<i64>> = artifacts.iter().map(|a| a.seed).collect();
    assert!(seeds.len() >= 2);
}

// S4: chained generate -> upscale, 2x.
#[tokio::test]
async fn s4_chained_generate_then_upscale() {
    let h = Harness::new();
    let mut req = base_request();
    req.width = 32;
    req.height = 32;
    req.steps = 1;
    req.count = 2;
    req.chain = Some(ChainSpec {
        upscale: Some(UpscaleSpec {
            scale: 2,
            r#impl: None,
            strict_scale: None,
        }),
    });
    let job_id = h.submit(req).await;

    let (job, steps) = h.repo.get_job_with_steps(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, Status::Succeeded);
    let step_names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(step_names, vec!["generate", "upscale"]);
    assert!(steps.iter().all(|s| s.status == Status::Succeeded));

    let artifacts = h.repo.list_artifacts_by_job(job_id).await.unwrap();
    assert_eq!(artifacts.len(), 4); // 2 generate + 2 upscale

    let generate_step_id = steps.iter().find(|s| s.name == "generate").unwrap().id;
    let upscale_step_id = steps.iter().find(|s| s.name == "upscale").unwrap().id;

    let upscale_artifacts: Vec<_> = artifacts.iter().filter(|a| a.step_id == upscale_step_id).collect();
    assert_eq!(upscale_artifacts.len(), 2);
    for artifact in &upscale_artifacts {
        assert_eq!((artifact.width, artifact.height), (64, 64));
        assert!(artifact.s3_key.contains("/upscale/"));
    }
    for artifact in artifacts.iter().filter(|a| a.step_id == generate_step_id) {
        assert!(artifact.s3_key.contains("/generate/"));
    }
}

// S5: validation failures never touch the repository.
#[tokio::test]
async fn s5_rejects_out_of_range_count() {
    let mut req = base_request();
    req.count = 0;
    assert_eq!(req.validate().unwrap_err().code(), "invalid_input");

    let mut req = base_request();
    req.count = 101;
    assert_eq!(req.validate().unwrap_err().code(), "invalid_input");
}

#[tokio::test]
async fn s5_rejects_unsupported_upscale_scale() {
    let mut req = base_request();
    req.chain = Some(ChainSpec {
        upscale: Some(UpscaleSpec {
            scale: 3,
            r#impl: None,
            strict_scale: None,
        }),
    });
    assert_eq!(req.validate().unwrap_err().code(), "invalid_input");
}

#[tokio::test]
async fn s5_rejects_unknown_upscale_impl() {
    let mut req = base_request();
    req.chain = Some(ChainSpec {
        upscale: Some(UpscaleSpec {
            scale: 2,
            r#impl: Some("unknown".into()),
            strict_scale: None,
        }),
    });
    assert_eq!(req.validate().unwrap_err().code(), "invalid_input");
}

#[tokio::test]
async fn s5_rejects_strict_diffusion_2x() {
    let mut req = base_request();
    req.chain = Some(ChainSpec {
        upscale: Some(UpscaleSpec {
            scale: 2,
            r#impl: Some("diffusion".into()),
            strict_scale: Some(true),
        }),
    });
    assert_eq!(req.validate().unwrap_err().code(), "invalid_input");
}

// S6: logs since_ts returns only events at or after the cursor, ascending.
#[tokio::test]
async fn s6_logs_since_ts_is_ascending_and_bounded() {
    let h = Harness::new();
    let job_id = h.submit(base_request()).await;

    let all_events = h.repo.iter_events(job_id, None, None).await.unwrap();
    let cursor_event = all_events
        .iter()
        .find(|e| e.code == event_code::ARTIFACT_WRITTEN)
        .unwrap();
    let cursor = cursor_event.ts;

    let since = h.repo.iter_events(job_id, Some(cursor), None).await.unwrap();
    assert!(since.iter().all(|e| e.ts >= cursor));
    assert!(since.windows(2).all(|w| w[0].ts <= w[1].ts));

    let codes: HashSet<&str> = since.iter().map(|e| e.code.as_str()).collect();
    assert!(codes.contains(event_code::STEP_FINISH));
    assert!(codes.contains(event_code::JOB_FINISH));
}
