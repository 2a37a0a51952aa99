//! Runtime configuration (§6 "Environment variables"), centralized into one
//! `Config::from_env()` the way the teacher scatters `env::var` calls through
//! `main.rs` — except gathered into a single typed struct so both the
//! `dreamforge-server` and `dreamforge-worker` binaries read it identically.

use std::env;
use std::time::Duration;

use crate::error::{DfError, DfResult};

const DEFAULT_PRESIGN_EXPIRES_S: u64 = 3600;
const MIN_PRESIGN_EXPIRES_S: u64 = 300;
const MAX_PRESIGN_EXPIRES_S: u64 = 86400;
const DEFAULT_SSE_POLL_MS: u64 = 500;
const DEFAULT_SSE_HEARTBEAT_S: u64 = 15;
const DEFAULT_LOGS_TAIL_DEFAULT: u32 = 100;
const DEFAULT_LOGS_TAIL_MAX: u32 = 2000;
const DEFAULT_WORKER_CONCURRENCY: usize = 4;
const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Object-store connection settings (§6 "Object store").
#[derive(Clone, Debug)]
pub struct S3Config {
    pub endpoint: String,
    pub public_endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    pub presign_expires_s: u64,
}

/// Which readiness checks `GET /readyz` performs (§4.9, §6 "Readiness").
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReadyChecks {
    pub db: bool,
    pub s3: bool,
}

impl ReadyChecks {
    fn parse(raw: &str) -> Self {
        let mut out = Self::default();
        for check in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match check {
                "db" => out.db = true,
                "s3" => out.s3 = true,
                _ => {}
            }
        }
        out
    }
}

/// The fully resolved process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind: String,
    pub db_url: Option<String>,
    pub db_file_path: String,
    pub redis_url: Option<String>,
    pub celery_eager: bool,
    pub worker_concurrency: usize,
    pub s3: Option<S3Config>,
    pub sse_poll: Duration,
    pub sse_heartbeat: Duration,
    pub logs_tail_default: u32,
    pub logs_tail_max: u32,
    pub ready_checks: ReadyChecks,
    pub model_fallback_path: Option<String>,
    pub artifact_key_prefix: String,
    pub engine_bin: Option<String>,
    pub upscaler_diffusion_bin: Option<String>,
    pub upscaler_gan_bin: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_var_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| env_var(name))
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> DfResult<T> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| DfError::invalid_input(format!("{name} must be a valid number, got {raw:?}"))),
    }
}

fn parse_bool(name: &str, default: bool) -> DfResult<bool> {
    match env_var(name) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(DfError::invalid_input(format!(
                "{name} must be a boolean, got {raw:?}"
            ))),
        },
    }
}

impl Config {
    /// Read and validate configuration from the process environment.
    pub fn from_env() -> DfResult<Self> {
        let bind = env_var("DF_BIND").unwrap_or_else(|| DEFAULT_BIND.to_owned());
        let db_url = env_var("DF_DB_URL");
        let db_file_path =
            env_var("DF_DB_FILE_PATH").unwrap_or_else(|| "./dreamforge-data/db.json".to_owned());
        let redis_url = env_var("DF_REDIS_URL");
        let celery_eager = parse_bool("DF_CELERY_EAGER", false)?;
        let worker_concurrency = parse_env("DF_WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?;

        let s3 = build_s3_config()?;

        let sse_poll_ms = parse_env("DF_SSE_POLL_MS", DEFAULT_SSE_POLL_MS)?;
        let sse_heartbeat_s = parse_env("DF_SSE_HEARTBEAT_S", DEFAULT_SSE_HEARTBEAT_S)?;
        let logs_tail_default = parse_env("DF_LOGS_TAIL_DEFAULT", DEFAULT_LOGS_TAIL_DEFAULT)?;
        let logs_tail_max = parse_env("DF_LOGS_TAIL_MAX", DEFAULT_LOGS_TAIL_MAX)?;
        let ready_checks = ReadyChecks::parse(&env_var("DF_READY_CHECKS").unwrap_or_default());
        let model_fallback_path = env_var("DF_MODEL_FALLBACK_PATH");
        let artifact_key_prefix =
            env_var("DF_S3_PREFIX").unwrap_or_else(|| "dreamforge/default".to_owned());
        let engine_bin = env_var("DF_ENGINE_BIN");
        let upscaler_diffusion_bin = env_var("DF_UPSCALER_DIFFUSION_BIN");
        let upscaler_gan_bin = env_var("DF_UPSCALER_GAN_BIN");

        Ok(Self {
            bind,
            db_url,
            db_file_path,
            redis_url,
            celery_eager,
            worker_concurrency,
            s3,
            sse_poll: Duration::from_millis(sse_poll_ms),
            sse_heartbeat: Duration::from_secs(sse_heartbeat_s),
            logs_tail_default,
            logs_tail_max,
            ready_checks,
            model_fallback_path,
            artifact_key_prefix,
            engine_bin,
            upscaler_diffusion_bin,
            upscaler_gan_bin,
        })
    }
}

fn build_s3_config() -> DfResult<Option<S3Config>> {
    let Some(endpoint) = env_var_first(&["DF_MINIO_ENDPOINT", "DF_S3_ENDPOINT"]) else {
        return Ok(None);
    };
    let bucket = env_var_first(&["DF_MINIO_BUCKET", "DF_S3_BUCKET"])
        .ok_or_else(|| DfError::invalid_input("DF_S3_BUCKET is required once an S3 endpoint is set"))?;
    let access_key = env_var("DF_S3_ACCESS_KEY").unwrap_or_default();
    let secret_key = env_var("DF_S3_SECRET_KEY").unwrap_or_default();
    let region = env_var("DF_S3_REGION").unwrap_or_else(|| "us-east-1".to_owned());
    let public_endpoint = env_var("DF_S3_PUBLIC_ENDPOINT");
    let presign_expires_s = parse_env("DF_PRESIGN_EXPIRES_S", DEFAULT_PRESIGN_EXPIRES_S)?
        .clamp(MIN_PRESIGN_EXPIRES_S, MAX_PRESIGN_EXPIRES_S);

    Ok(Some(S3Config {
        endpoint,
        public_endpoint,
        access_key,
        secret_key,
        bucket,
        region,
        presign_expires_s,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_checks_parses_comma_list() {
        let checks = ReadyChecks::parse("db,s3");
        assert!(checks.db);
        assert!(checks.s3);
    }

    #[test]
    fn ready_checks_ignores_unknown_entries() {
        let checks = ReadyChecks::parse("db, bogus");
        assert!(checks.db);
        assert!(!checks.s3);
    }

    #[test]
    fn ready_checks_empty_string_is_all_false() {
        let checks = ReadyChecks::parse("");
        assert_eq!(checks, ReadyChecks::default());
    }
}
