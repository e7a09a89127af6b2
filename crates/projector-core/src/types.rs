//! Core types for Projector: requests, retry policy, surface configuration and
//! quality levels.

use crate::backoff::calculate_delay;
use crate::drm::ProtectionConfig;
use crate::error::{Error, ErrorCategory, Result};
use crate::source::normalize_sources;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifier of a load request. Equal to the engine epoch the request began.
pub type RequestId = u64;

/// Retry policy applied to every candidate source of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0-5)
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (0-5000)
    pub base_delay_ms: u64,
    /// Hard cap on any single delay in milliseconds (0-30000)
    pub max_delay_ms: u64,
    /// Exponential growth factor (1-4)
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the delay (0-1)
    pub jitter_ratio: f64,
    /// Failure categories that may be retried
    pub retryable: BTreeSet<ErrorCategory>,
}

impl RetryPolicy {
    pub const MAX_RETRIES: u32 = 5;
    pub const MAX_BASE_DELAY_MS: u64 = 5_000;
    pub const MAX_DELAY_MS: u64 = 30_000;
    pub const MIN_MULTIPLIER: f64 = 1.0;
    pub const MAX_MULTIPLIER: f64 = 4.0;

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    pub fn with_retryable(mut self, categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        self.retryable = categories.into_iter().collect();
        self
    }

    /// Clamp every field into its documented range. Control categories are
    /// dropped from the retryable set.
    pub fn normalized(mut self) -> Self {
        self.max_retries = self.max_retries.min(Self::MAX_RETRIES);
        self.base_delay_ms = self.base_delay_ms.min(Self::MAX_BASE_DELAY_MS);
        self.max_delay_ms = self.max_delay_ms.min(Self::MAX_DELAY_MS);
        self.backoff_multiplier = if self.backoff_multiplier.is_nan() {
            Self::MIN_MULTIPLIER
        } else {
            self.backoff_multiplier
                .clamp(Self::MIN_MULTIPLIER, Self::MAX_MULTIPLIER)
        };
        self.jitter_ratio = if self.jitter_ratio.is_nan() {
            0.0
        } else {
            self.jitter_ratio.clamp(0.0, 1.0)
        };
        self.retryable.retain(|c| !c.is_control());
        self
    }

    /// Total attempts allowed for one candidate.
    pub fn attempt_limit(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn is_retryable(&self, category: ErrorCategory) -> bool {
        !category.is_control() && self.retryable.contains(&category)
    }

    /// Delay before the retry that follows attempt `attempt` (0-indexed).
    pub fn delay_for_attempt<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        Duration::from_millis(calculate_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.backoff_multiplier,
            self.jitter_ratio,
            rng,
        ))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            retryable: [
                ErrorCategory::Network,
                ErrorCategory::Timeout,
                ErrorCategory::Server,
                ErrorCategory::Unknown,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// Static configuration applied to the playback surface before any adapter attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub autoplay: bool,
    pub muted: bool,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    pub plays_inline: bool,
    pub poster: Option<String>,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            autoplay: false,
            muted: false,
            loop_playback: false,
            plays_inline: true,
            poster: None,
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns quality tier name
    pub fn quality_name(&self) -> &'static str {
        match self.height {
            0..=240 => "240p",
            241..=360 => "360p",
            361..=480 => "480p",
            481..=720 => "720p",
            721..=1080 => "1080p",
            1081..=1440 => "1440p",
            _ => "4K",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A selectable quality level reported by the active adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLevel {
    pub id: String,
    pub label: String,
    /// Bandwidth in bits per second
    pub bitrate: Option<u64>,
    pub resolution: Option<Resolution>,
    pub active: bool,
}

impl QualityLevel {
    /// The adaptive "let the adapter decide" level.
    pub fn auto() -> Self {
        Self {
            id: "auto".to_string(),
            label: "Auto".to_string(),
            bitrate: None,
            resolution: None,
            active: true,
        }
    }

    /// Level labelled after its resolution tier.
    pub fn from_resolution(id: impl Into<String>, resolution: Resolution, bitrate: u64) -> Self {
        Self {
            id: id.into(),
            label: resolution.quality_name().to_string(),
            bitrate: Some(bitrate),
            resolution: Some(resolution),
            active: false,
        }
    }
}

/// One playback request. Immutable once built.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    sources: Vec<String>,
    protection: Option<ProtectionConfig>,
    retry_policy: Option<RetryPolicy>,
    surface: Option<SurfaceConfig>,
    cancel: Option<CancellationToken>,
}

impl PlaybackRequest {
    pub fn builder(primary: impl Into<String>) -> PlaybackRequestBuilder {
        PlaybackRequestBuilder {
            sources: vec![primary.into()],
            protection: None,
            retry_policy: None,
            surface: None,
            cancel: None,
        }
    }

    /// Request for a single source with engine defaults.
    pub fn single(source: impl Into<String>) -> Result<Self> {
        Self::builder(source).build()
    }

    /// Candidate sources: trimmed, non-empty, deduplicated, primary first.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn protection(&self) -> Option<&ProtectionConfig> {
        self.protection.as_ref()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn surface_config(&self) -> Option<&SurfaceConfig> {
        self.surface.as_ref()
    }

    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}

/// Builder for [`PlaybackRequest`]
#[derive(Debug, Clone)]
pub struct PlaybackRequestBuilder {
    sources: Vec<String>,
    protection: Option<ProtectionConfig>,
    retry_policy: Option<RetryPolicy>,
    surface: Option<SurfaceConfig>,
    cancel: Option<CancellationToken>,
}

impl PlaybackRequestBuilder {
    pub fn fallback(mut self, source: impl Into<String>) -> Self {
        self.sources.push(source.into());
        self
    }

    pub fn fallbacks<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.extend(sources.into_iter().map(Into::into));
        self
    }

    pub fn protection(mut self, config: ProtectionConfig) -> Self {
        self.protection = Some(config);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn surface_config(mut self, config: SurfaceConfig) -> Self {
        self.surface = Some(config);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<PlaybackRequest> {
        let sources = normalize_sources(self.sources);
        if sources.is_empty() {
            return Err(Error::InvalidRequest(
                "at least one non-empty source is required".to_string(),
            ));
        }

        Ok(PlaybackRequest {
            sources,
            protection: self.protection,
            retry_policy: self.retry_policy.map(RetryPolicy::normalized),
            surface: self.surface,
            cancel: self.cancel,
        })
    }
}
