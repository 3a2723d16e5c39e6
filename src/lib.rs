//! Real-time convolution of a live input with a long impulse response using
//! non-uniform partitions: small blocks near the start of the impulse for
//! low latency, doubling blocks further out, each computed on its own
//! schedule by pooled workers and time-aligned into a shared output ring.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod depositor;
pub mod engine;
pub mod error;
pub mod fft;
pub mod history;
pub mod impulse;
pub mod output;
pub mod planner;
pub mod render;
pub mod stats;
#[cfg(feature = "live")]
pub mod transport;
pub mod worker;
mod tests;

pub use config::{DeadlinePolicy, EngineConfig};
pub use engine::{ConvolutionEngine, GenericConvolutionEngine};
pub use error::{ConvolutionError, Result};
pub use impulse::ImpulseResponse;
pub use planner::PartitionPlan;
pub use stats::StatsSnapshot;

pub type Sample = f32;

/// A fixed-block audio processor driven once per callback.
pub trait Convolution {
    /// Frames per callback.
    fn block_size(&self) -> usize;

    fn num_channels(&self) -> usize;

    // must not block or allocate unboundedly: it runs on the audio thread
    fn process(&mut self, input: &[Sample], output: &mut [Sample]) -> Result<()>;
}
