//! Deterministic fakes used by S1-S6 (§8): a solid-color image derived from
//! the seed, matching `_run_fake`/the upscale fake path in
//! `services/worker/tasks/{generate,upscale}.py` exactly, so the same test
//! fixtures remain meaningful across languages.

use async_trait::async_trait;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::model::Format;
use dreamforge_core::ports::{Engine, GenerateItem, GenerateRequest, Upscaler, UpscaleRequest, UpscaleResult};
use rand::Rng;

fn solid_color_png(width: u32, height: u32, seed: i64) -> DfResult<Vec<u8>> {
    let seed = seed.rem_euclid(1 << 31) as u32;
    let color = [
        (seed % 256) as u8,
        ((seed / 3) % 256) as u8,
        ((seed / 7) % 256) as u8,
    ];
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .map_err(|e| DfError::internal(format!("fake engine encode failed: {e}")))?;
    Ok(bytes)
}

/// Per-item seeding (§4.6): a single-item request with an explicit seed
/// reuses it; every other case draws a fresh seed uniformly from
/// `[1, 2^31-1]`, independently per item, so a batch always shows at least
/// two distinct seeds.
pub(crate) fn seeds_for(count: u32, seed: Option<i64>) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    if count == 1 {
        if let Some(seed) = seed {
            return vec![seed];
        }
    }
    (0..count).map(|_| rng.gen_range(1..=(i64::from(i32::MAX)))).collect()
}

/// The fake `Engine`: produces a solid-color PNG per item, no model or GPU
/// involved (§8 "a fake engine that writes a deterministic solid-color PNG
/// from the seed").
pub struct FakeEngine;

#[async_trait]
impl Engine for FakeEngine {
    async fn generate(&self, req: GenerateRequest) -> DfResult<Vec<GenerateItem>> {
        let seeds = seeds_for(req.count, req.seed);
        seeds
            .into_iter()
            .map(|seed| {
                Ok(GenerateItem {
                    bytes: solid_color_png(req.width, req.height, seed)?,
                    width: req.width,
                    height: req.height,
                    seed,
                    format: req.format,
                })
            })
            .collect()
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

/// The fake `Upscaler`: re-synthesizes the same solid color at
/// `scale * (width, height)`, mirroring `upscale.py`'s fake path.
pub struct FakeUpscaler;

#[async_trait]
impl Upscaler for FakeUpscaler {
    async fn upscale(&self, req: UpscaleRequest) -> DfResult<UpscaleResult> {
        let source = image::load_from_memory(&req.input)
            .map_err(|e| DfError::internal(format!("fake upscaler decode failed: {e}")))?;
        let seed = extract_seed_hint(&req.input).unwrap_or(1);
        let width = source.width() * req.scale_factor;
        let height = source.height() * req.scale_factor;
        Ok(UpscaleResult {
            bytes: solid_color_png(width, height, seed)?,
            width,
            height,
            format: Format::Png,
            scale_factor_used: req.scale_factor,
        })
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

/// The fake engine encodes no seed metadata in the PNG itself; callers that
/// need the seed preserved across the upscale step pass it out-of-band
/// (§4.7: "the original seed... propagated"). This best-effort decode from a
/// solid image's top-left pixel lets the fake upscaler stay self-contained
/// when only bytes are available; production callers always propagate the
/// seed explicitly instead of relying on this.
fn extract_seed_hint(png: &[u8]) -> Option<i64> {
    let img = image::load_from_memory(png).ok()?.to_rgb8();
    let pixel = *img.get_pixel(0, 0);
    Some(i64::from(pixel[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_item_with_seed_is_deterministic() {
        let engine = FakeEngine;
        let req = GenerateRequest {
            model: None,
            prompt: "test".into(),
            width: 64,
            height: 64,
            count: 1,
            seed: Some(123_456),
            format: Format::Png,
        };
        let items = engine.generate(req).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].seed, 123_456);
    }

    #[tokio::test]
    async fn batch_of_five_has_distinct_seeds() {
        let engine = FakeEngine;
        let req = GenerateRequest {
            model: None,
            prompt: "test".into(),
            width: 8,
            height: 8,
            count: 5,
            seed: Some(1),
            format: Format::Png,
        };
        let items = engine.generate(req).await.unwrap();
        assert_eq!(items.len(), 5);
        let distinct: std::collections::HashSet<_> = items.iter().map(|i| i.seed).collect();
        assert!(distinct.len() >= 2);
    }

    #[tokio::test]
    async fn upscale_scales_dimensions() {
        let source = solid_color_png(32, 32, 7).unwrap();
        let upscaler = FakeUpscaler;
        let result = upscaler
            .upscale(UpscaleRequest {
                model: None,
                input: source,
                input_format: Format::Png,
                scale_factor: 2,
                impl_name: None,
                strict_scale: false,
            })
            .await
            .unwrap();
        assert_eq!((result.width, result.height), (64, 64));
    }
}
