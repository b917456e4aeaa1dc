//! Broadcast pacing configuration.

use std::time::Duration;
use thiserror::Error;

/// Invalid pacing configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Invalid duration for {field}: {value}")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("Start step {start_step} out of range (trace has {total_steps} steps)")]
    StartStepOutOfRange { start_step: usize, total_steps: usize },
}

/// Configuration for the pacing loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastConfig {
    /// Step shown before the first advance (default: 0)
    pub start_step: usize,

    /// Pause between the first viewer connecting and the first advance (default: 10s)
    pub initial_delay: Duration,

    /// Time each step stays on screen (default: 0.5s)
    pub step_interval: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            start_step: 0,
            initial_delay: Duration::from_secs(10),
            step_interval: Duration::from_millis(500),
        }
    }
}

impl BroadcastConfig {
    /// Builds a configuration from fractional seconds, as given on the
    /// command line.
    pub fn from_secs(
        start_step: usize,
        initial_delay_secs: f64,
        step_interval_secs: f64,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            start_step,
            initial_delay: secs_to_duration("initial_delay", initial_delay_secs)?,
            step_interval: secs_to_duration("step_interval", step_interval_secs)?,
        })
    }

    /// Sets the start step.
    pub fn with_start_step(mut self, step: usize) -> Self {
        self.start_step = step;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the per-step interval.
    pub fn with_step_interval(mut self, interval: Duration) -> Self {
        self.step_interval = interval;
        self
    }

    /// Checks the configuration against a trace of `total_steps` steps.
    pub fn validate(&self, total_steps: usize) -> Result<(), ConfigError> {
        if self.start_step >= total_steps {
            return Err(ConfigError::StartStepOutOfRange {
                start_step: self.start_step,
                total_steps,
            });
        }
        Ok(())
    }
}

fn secs_to_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidDuration { field, value: secs })
}
