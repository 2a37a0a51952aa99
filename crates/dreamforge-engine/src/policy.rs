//! Polymorphic upscaler selection (§4.7, §9's "sum-type" redesign note): a
//! pure `(impl, scale)` policy function plus a wrapper that applies the
//! fallback-once rule, grounded on `_child_upscale_bytes`'s `try_impl`/
//! fallback logic in `services/worker/tasks/upscale.py`.

use async_trait::async_trait;
use dreamforge_core::error::{DfError, DfResult};
use dreamforge_core::ports::{Upscaler, UpscaleRequest, UpscaleResult};

/// The two real upscaler implementation families (§9: `Diffusion`, `Gan`;
/// `Fallback` is not a third kind but the *behavior* of [`PolicyUpscaler`]).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpscalerKind {
    Diffusion,
    Gan,
}

/// `auto`: 2x -> gan, 4x -> diffusion (§4.7).
pub fn select_impl(requested: Option<&str>, scale: u32) -> DfResult<UpscalerKind> {
    match requested.unwrap_or("auto") {
        "auto" => Ok(if scale >= 4 {
            UpscalerKind::Diffusion
        } else {
            UpscalerKind::Gan
        }),
        "diffusion" => Ok(UpscalerKind::Diffusion),
        "gan" => Ok(UpscalerKind::Gan),
        other => Err(DfError::invalid_input(format!("unknown upscaler impl {other:?}"))),
    }
}

fn alternate(kind: UpscalerKind) -> UpscalerKind {
    match kind {
        UpscalerKind::Diffusion => UpscalerKind::Gan,
        UpscalerKind::Gan => UpscalerKind::Diffusion,
    }
}

/// Wraps a diffusion and a gan implementation behind one `Upscaler`,
/// resolving `impl`/`scale` to a primary implementation and, unless
/// `strict_scale` is set, falling back to the alternate implementation
/// exactly once on error (§4.7 "Failure policy").
pub struct PolicyUpscaler<D, G> {
    diffusion: D,
    gan: G,
}

impl<D, G> PolicyUpscaler<D, G>
where
    D: Upscaler,
    G: Upscaler,
{
    pub const fn new(diffusion: D, gan: G) -> Self {
        Self { diffusion, gan }
    }

    fn dispatch(&self, kind: UpscalerKind) -> &(dyn Upscaler) {
        match kind {
            UpscalerKind::Diffusion => &self.diffusion,
            UpscalerKind::Gan => &self.gan,
        }
    }
}

#[async_trait]
impl<D, G> Upscaler for PolicyUpscaler<D, G>
where
    D: Upscaler,
    G: Upscaler,
{
    async fn upscale(&self, req: UpscaleRequest) -> DfResult<UpscaleResult> {
        let primary = select_impl(req.impl_name.as_deref(), req.scale_factor)?;

        if req.strict_scale && primary == UpscalerKind::Diffusion && req.scale_factor == 2 {
            return Err(DfError::invalid_input(
                "strict_scale=true and impl=diffusion cannot realize 2x",
            ));
        }

        match self.dispatch(primary).upscale(req.clone()).await {
            Ok(result) => Ok(result),
            Err(primary_err) if req.strict_scale => Err(primary_err),
            Err(primary_err) => {
                let fallback = alternate(primary);
                self.dispatch(fallback)
                    .upscale(req)
                    .await
                    .map_err(|_| primary_err)
            }
        }
    }

    fn kind(&self) -> &'static str {
        "policy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_picks_gan_for_2x_and_diffusion_for_4x() {
        assert_eq!(select_impl(None, 2).unwrap(), UpscalerKind::Gan);
        assert_eq!(select_impl(None, 4).unwrap(), UpscalerKind::Diffusion);
    }

    #[test]
    fn unknown_impl_is_rejected() {
        assert!(select_impl(Some("bogus"), 2).is_err());
    }
}
