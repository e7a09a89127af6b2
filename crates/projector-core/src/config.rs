//! Engine configuration

use crate::drm::DEFAULT_LICENSE_TIMEOUT_MS;
use crate::error::{Error, Result};
use crate::sampler::SamplingConfig;
use crate::types::{RetryPolicy, SurfaceConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine-wide defaults. Every field may be omitted in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Used by requests that do not carry their own policy
    pub default_retry_policy: RetryPolicy,
    /// Used by requests that do not carry their own surface configuration
    pub surface: SurfaceConfig,
    pub license_timeout_ms: u64,
    /// Coalescing window for time and progress updates
    pub frame_interval_ms: u64,
    pub time_epsilon: f64,
    pub duration_epsilon: f64,
    pub buffer_epsilon: f64,
    /// Buffered engine events per subscriber
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let sampling = SamplingConfig::default();
        Self {
            default_retry_policy: RetryPolicy::default(),
            surface: SurfaceConfig::default(),
            license_timeout_ms: DEFAULT_LICENSE_TIMEOUT_MS,
            frame_interval_ms: 16,
            time_epsilon: sampling.time_epsilon,
            duration_epsilon: sampling.duration_epsilon,
            buffer_epsilon: sampling.buffer_epsilon,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validated()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Reject values the engine cannot work with and clamp the retry policy
    pub fn validated(mut self) -> Result<Self> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.license_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "license_timeout_ms must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("time_epsilon", self.time_epsilon),
            ("duration_epsilon", self.duration_epsilon),
            ("buffer_epsilon", self.buffer_epsilon),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a non-negative number"
                )));
            }
        }
        self.default_retry_policy = self.default_retry_policy.normalized();
        Ok(self)
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            time_epsilon: self.time_epsilon,
            duration_epsilon: self.duration_epsilon,
            buffer_epsilon: self.buffer_epsilon,
        }
    }

    pub fn license_timeout(&self) -> Duration {
        Duration::from_millis(self.license_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}
