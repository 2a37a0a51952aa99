//! Job submission request validation (§4.3, §6 C4): the typed body, its
//! defaults, and the constraints that must hold before a job is ever
//! persisted. Nothing here mutates state — on any violation the caller
//! returns `invalid_input` without touching the repository.

use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::model::Format;
use dreamforge_core::repository::ChainStep;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

fn default_guidance() -> f64 {
    7.0
}

fn default_count() -> u32 {
    1
}

fn default_format() -> String {
    "png".to_owned()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpscaleSpec {
    pub scale: u32,
    #[serde(default)]
    pub r#impl: Option<String>,
    #[serde(default)]
    pub strict_scale: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChainSpec {
    pub upscale: Option<UpscaleSpec>,
}

/// `POST /v1/jobs` body (§6).
#[derive(Clone, Debug, Deserialize)]
pub struct CreateJobRequest {
    pub r#type: String,
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    #[serde(default = "default_guidance")]
    pub guidance: f64,
    #[serde(default)]
    pub scheduler: Option<String>,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub embed_metadata: bool,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub model_id: Option<Uuid>,
    #[serde(default)]
    pub chain: Option<ChainSpec>,
}

/// The outcome of validating a [`CreateJobRequest`]: the raw body kept
/// verbatim as `Job::params` (§4.3 "creates Job with `params=<full
/// request>`") plus the derived step chain.
pub struct ValidatedJob {
    pub params: Value,
    pub chain: Vec<ChainStep>,
}

impl CreateJobRequest {
    pub fn validate(&self) -> DfResult<ValidatedJob> {
        if self.r#type != "generate" {
            return Err(DfError::invalid_input(format!(
                "type must be \"generate\", got {:?}",
                self.r#type
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(DfError::invalid_input("width and height must be positive"));
        }
        if self.steps == 0 {
            return Err(DfError::invalid_input("steps must be positive"));
        }
        if !(1..=100).contains(&self.count) {
            return Err(DfError::invalid_input("count must be in [1, 100]"));
        }
        let format = match self.format.as_str() {
            "png" => Format::Png,
            "jpg" => Format::Jpg,
            other => {
                return Err(DfError::invalid_input(format!(
                    "format must be \"png\" or \"jpg\", got {other:?}"
                )))
            }
        };

        let mut chain = vec![ChainStep {
            name: dreamforge_core::model::Step::GENERATE.to_owned(),
            metadata: serde_json::json!({}),
        }];

        if let Some(ChainSpec {
            upscale: Some(upscale),
        }) = &self.chain
        {
            if upscale.scale != 2 && upscale.scale != 4 {
                return Err(DfError::invalid_input("chain.upscale.scale must be 2 or 4"));
            }
            let impl_name = upscale.r#impl.clone().unwrap_or_else(|| "auto".to_owned());
            if !matches!(impl_name.as_str(), "auto" | "diffusion" | "gan") {
                return Err(DfError::invalid_input(format!(
                    "chain.upscale.impl must be \"auto\", \"diffusion\", or \"gan\", got {impl_name:?}"
                )));
            }
            let strict_scale = upscale.strict_scale.unwrap_or(false);
            if strict_scale && impl_name == "diffusion" && upscale.scale == 2 {
                return Err(DfError::invalid_input(
                    "strict_scale=true and impl=diffusion cannot realize a 2x upscale",
                ));
            }

            chain.push(ChainStep {
                name: dreamforge_core::model::Step::UPSCALE.to_owned(),
                metadata: serde_json::json!({
                    "scale": upscale.scale,
                    "impl": impl_name,
                    "strict_scale": strict_scale,
                }),
            });
        }

        let params = serde_json::json!({
            "type": self.r#type,
            "prompt": self.prompt,
            "negative_prompt": self.negative_prompt,
            "width": self.width,
            "height": self.height,
            "steps": self.steps,
            "guidance": self.guidance,
            "scheduler": self.scheduler,
            "format": format.extension(),
            "embed_metadata": self.embed_metadata,
            "seed": self.seed,
            "count": self.count,
            "model_id": self.model_id,
            "chain": self.chain.as_ref().map(|c| serde_json::json!({
                "upscale": c.upscale.as_ref().map(|u| serde_json::json!({
                    "scale": u.scale,
                    "impl": u.r#impl,
                    "strict_scale": u.strict_scale,
                })),
            })),
        });

        Ok(ValidatedJob { params, chain })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CreateJobRequest {
        CreateJobRequest {
            r#type: "generate".into(),
            prompt: "test".into(),
            negative_prompt: None,
            width: 64,
            height: 64,
            steps: 2,
            guidance: 7.0,
            scheduler: None,
            format: "png".into(),
            embed_metadata: true,
            seed: None,
            count: 1,
            model_id: None,
            chain: None,
        }
    }

    #[test]
    fn rejects_zero_count() {
        let mut req = base();
        req.count = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_count_over_100() {
        let mut req = base();
        req.count = 101;
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_unsupported_upscale_scale() {
        let mut req = base();
        req.chain = Some(ChainSpec {
            upscale: Some(UpscaleSpec {
                scale: 3,
                r#impl: None,
                strict_scale: None,
            }),
        });
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_unknown_impl() {
        let mut req = base();
        req.chain = Some(ChainSpec {
            upscale: Some(UpscaleSpec {
                scale: 2,
                r#impl: Some("unknown".into()),
                strict_scale: None,
            }),
        });
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_strict_diffusion_2x() {
        let mut req = base();
        req.chain = Some(ChainSpec {
            upscale: Some(UpscaleSpec {
                scale: 2,
                r#impl: Some("diffusion".into()),
                strict_scale: Some(true),
            }),
        });
        let err = req.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn accepts_a_valid_chained_request() {
        let mut req = base();
        req.chain = Some(ChainSpec {
            upscale: Some(UpscaleSpec {
                scale: 2,
                r#impl: None,
                strict_scale: None,
            }),
        });
        let validated = req.validate().unwrap();
        assert_eq!(validated.chain.len(), 2);
        assert_eq!(validated.chain[1].name, "upscale");
    }
}
