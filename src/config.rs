use crate::error::{ConvolutionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What the controller does when an output block is due but some of its
/// contributions are still being computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlinePolicy {
    /// Never wait: play what is there and count a missed deadline.
    #[default]
    RealTime,
    /// Wait for every contribution. Deterministic, for offline use.
    Wait,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames per callback, the smallest partition.
    pub min_block_size: usize,
    pub sample_rate: u32,
    /// Gain applied to input as it enters the history. Defaults to
    /// `1 / (2 * min_block_size)`, which cancels the unnormalized transforms.
    pub input_gain: Option<f32>,
    /// Worker pool size, 0 for one per core.
    pub worker_threads: usize,
    pub deadline: DeadlinePolicy,
    /// How long the idle deposit thread sleeps between checks.
    pub poll_interval_us: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_block_size: 256,
            sample_rate: 44100,
            input_gain: None,
            worker_threads: 0,
            deadline: DeadlinePolicy::RealTime,
            poll_interval_us: 250,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_block_size == 0 || !self.min_block_size.is_power_of_two() {
            return Err(ConvolutionError::InvalidBlockSize(self.min_block_size));
        }
        if self.sample_rate == 0 {
            return Err(ConvolutionError::InvalidConfig(
                "sample_rate must be non-zero".into(),
            ));
        }
        if let Some(gain) = self.input_gain {
            if !gain.is_finite() || gain <= 0.0 {
                return Err(ConvolutionError::InvalidConfig(format!(
                    "input_gain must be positive and finite, got {}",
                    gain
                )));
            }
        }
        Ok(())
    }

    pub fn effective_input_gain(&self) -> f32 {
        self.input_gain
            .unwrap_or(1.0 / (2 * self.min_block_size) as f32)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us.max(1))
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.min_block_size as f64 / self.sample_rate as f64)
    }

    pub fn with_block_size(mut self, min_block_size: usize) -> Self {
        self.min_block_size = min_block_size;
        self
    }

    pub fn with_deadline(mut self, deadline: DeadlinePolicy) -> Self {
        self.deadline = deadline;
        self
    }
}
