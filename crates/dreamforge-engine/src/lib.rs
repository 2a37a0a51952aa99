//! `Engine`/`Upscaler` implementations (§4.2, §4.6, §4.7): deterministic
//! in-process fakes for tests, and a subprocess-isolated path for real
//! model work.

mod fake;
mod policy;
mod subprocess;

pub use fake::{FakeEngine, FakeUpscaler};
pub use policy::{select_impl, PolicyUpscaler, UpscalerKind};
pub use subprocess::{SubprocessEngine, SubprocessUpscaler};
