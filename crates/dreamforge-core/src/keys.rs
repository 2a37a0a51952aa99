//! Artifact object-storage key layout (§4.6, §6 `DF_S3_PREFIX`).
//!
//! `{prefix}/jobs/{jobId}/{step}/{YYYYmmddTHHMMSS}_{itemIndex}_{W}x{H}_{seed}.{ext}`

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Build the object key for one artifact.
///
/// `seed` is rendered as `none` when the item carried no seed — this never
/// happens for `generate` output (§4.7 always assigns one) but keeps the
/// format total for any future step that omits it.
pub fn artifact_key(
    prefix: &str,
    job_id: Uuid,
    step_name: &str,
    created_at: DateTime<Utc>,
    item_index: u32,
    width: u32,
    height: u32,
    seed: Option<i64>,
    ext: &str,
) -> String {
    let stamp = created_at.format("%Y%m%dT%H%M%S");
    let seed = seed.map_or_else(|| "none".to_string(), |s| s.to_string());
    format!(
        "{prefix}/jobs/{job_id}/{step_name}/{stamp}_{item_index}_{width}x{height}_{seed}.{ext}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_the_documented_shape() {
        let job_id = Uuid::nil();
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let key = artifact_key("dreamforge/default", job_id, "generate", ts, 0, 512, 768, Some(42), "png");
        assert_eq!(
            key,
            format!(
                "dreamforge/default/jobs/{job_id}/generate/20260102T030405_0_512x768_42.png"
            )
        );
    }

    #[test]
    fn renders_absent_seed_as_none() {
        let job_id = Uuid::nil();
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let key = artifact_key("dreamforge/default", job_id, "upscale", ts, 1, 1024, 1536, None, "jpg");
        assert!(key.ends_with("_1_1024x1536_none.jpg"));
    }
}
