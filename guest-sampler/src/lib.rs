//! Time-driven call stack sampler for guests running under an
//! instrumentation host, plus the offline tooling reading its output.

pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod memory;
pub mod record;
pub mod regs;
pub mod sampler;
pub mod walker;
pub mod writer;

pub mod fold;
pub mod json;
pub mod output;

pub use guest_sampler_common::{PointerWidth, MAX_DEPTH};
pub use host::{install, HostRuntime};
pub use sampler::Sampler;
pub use walker::{walk, Sample};
