//! Change-threshold filtering for high-frequency surface notifications

use serde::{Deserialize, Serialize};

/// Minimum changes worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seconds of playback position
    pub time_epsilon: f64,
    /// Seconds of media duration
    pub duration_epsilon: f64,
    /// Percentage points of buffered range
    pub buffer_epsilon: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            time_epsilon: 0.05,
            duration_epsilon: 0.01,
            buffer_epsilon: 0.25,
        }
    }
}

/// Remembers the last reported values and rejects changes below threshold.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSampler {
    config: SamplingConfig,
    last_time: Option<(f64, f64)>,
    last_buffered: Option<f64>,
}

impl PlaybackSampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self {
            config,
            last_time: None,
            last_buffered: None,
        }
    }

    /// True when position or duration moved enough to report
    pub fn accept_time(&mut self, current: f64, duration: f64) -> bool {
        let changed = match self.last_time {
            None => true,
            Some((last_current, last_duration)) => {
                (current - last_current).abs() > self.config.time_epsilon
                    || (duration - last_duration).abs() > self.config.duration_epsilon
                    // NaN durations (unknown length) becoming known
                    || last_duration.is_nan() != duration.is_nan()
            }
        };
        if changed {
            self.last_time = Some((current, duration));
        }
        changed
    }

    pub fn accept_progress(&mut self, buffered_percent: f64) -> bool {
        let changed = match self.last_buffered {
            None => true,
            Some(last) => (buffered_percent - last).abs() > self.config.buffer_epsilon,
        };
        if changed {
            self.last_buffered = Some(buffered_percent);
        }
        changed
    }

    /// Forget reported values once a new source was bound
    pub fn reset(&mut self) {
        self.last_time = None;
        self.last_buffered = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_threshold() {
        let mut sampler = PlaybackSampler::new(SamplingConfig::default());

        assert!(sampler.accept_time(0.0, 120.0));
        assert!(!sampler.accept_time(0.03, 120.0));
        // compared against the last reported value, not the last seen one
        assert!(sampler.accept_time(0.06, 120.0));
        assert!(sampler.accept_time(0.06, 121.0));
    }

    #[test]
    fn test_progress_threshold() {
        let mut sampler = PlaybackSampler::new(SamplingConfig::default());

        assert!(sampler.accept_progress(10.0));
        assert!(!sampler.accept_progress(10.2));
        assert!(sampler.accept_progress(10.3));

        sampler.reset();
        assert!(sampler.accept_progress(10.3));
    }

    #[test]
    fn test_unknown_duration_becoming_known() {
        let mut sampler = PlaybackSampler::new(SamplingConfig::default());
        assert!(sampler.accept_time(0.0, f64::NAN));
        assert!(sampler.accept_time(0.0, 42.0));
    }
}
