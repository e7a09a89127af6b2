//! Error types for Projector Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure, used to drive retry and failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    /// Remote 5xx-class failure
    Server,
    /// Format or codec the adapter cannot play
    Unsupported,
    Unknown,
    /// Cancellation signal fired
    Aborted,
    /// A newer load request took over
    Superseded,
}

impl ErrorCategory {
    /// Control categories terminate a load immediately: no retry, no failover.
    pub fn is_control(&self) -> bool {
        matches!(self, ErrorCategory::Aborted | ErrorCategory::Superseded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Server => "server",
            ErrorCategory::Unsupported => "unsupported",
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::Aborted => "aborted",
            ErrorCategory::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine error types
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Request / lifecycle errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Engine has been disposed")]
    Disposed,

    #[error("Load aborted")]
    Aborted,

    #[error("Load request {request_id} superseded by request {current}")]
    Superseded { request_id: u64, current: u64 },

    #[error("Capability probe failed: {0}")]
    Capability(String),

    // Source / adapter errors
    #[error("Unsupported format: no adapter can handle {locator}")]
    UnsupportedFormat { locator: String },

    #[error("{message}")]
    Adapter {
        message: String,
        /// Category reported by the adapter itself. Takes precedence over
        /// message inspection.
        category: Option<ErrorCategory>,
    },

    #[error("Playback failed after {attempts} attempts across {sources} source(s): {last}")]
    Exhausted {
        attempts: u32,
        sources: usize,
        last: Box<Error>,
        /// Every failed attempt, in order
        failures: Vec<FailureRecord>,
    },

    #[error("Playback surface error: {0}")]
    Surface(String),

    // Content protection errors
    #[error("No supported key system among: {candidates}")]
    NoSupportedKeySystem { candidates: String },

    #[error("License request timed out after {timeout_ms}ms")]
    LicenseTimeout { timeout_ms: u64 },

    #[error("License server responded with HTTP {status}")]
    LicenseHttp { status: u16 },

    #[error("Malformed license challenge: {0}")]
    MalformedChallenge(String),

    #[error("License acquisition failed: {0}")]
    LicenseAcquisition(String),

    #[error("Content protection failed: {0}")]
    Protection(Box<Error>),

    #[error("Invalid license state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One failed attempt against a candidate source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source: String,
    /// 0-indexed attempt within the candidate
    pub attempt: u32,
    pub category: ErrorCategory,
    pub message: String,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl Error {
    /// Adapter failure whose category is inferred from the message.
    pub fn adapter(message: impl Into<String>) -> Self {
        Error::Adapter {
            message: message.into(),
            category: None,
        }
    }

    /// Adapter failure with an explicitly reported category.
    pub fn adapter_with(category: ErrorCategory, message: impl Into<String>) -> Self {
        Error::Adapter {
            message: message.into(),
            category: Some(category),
        }
    }

    /// Create a DRM error
    pub fn drm(msg: impl Into<String>) -> Self {
        Error::LicenseAcquisition(msg.into())
    }

    /// Wrap a license failure for the caller-facing channel.
    pub fn protection(inner: Error) -> Self {
        match inner {
            already @ Error::Protection(_) => already,
            other => Error::Protection(Box::new(other)),
        }
    }

    /// Classify this error for retry and failover decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Aborted | Error::Disposed => ErrorCategory::Aborted,
            Error::Superseded { .. } => ErrorCategory::Superseded,
            Error::UnsupportedFormat { .. } | Error::NoSupportedKeySystem { .. } => {
                ErrorCategory::Unsupported
            }
            Error::Adapter {
                category: Some(category),
                ..
            } => *category,
            Error::Adapter {
                message,
                category: None,
            } => classify_message(message),
            Error::Capability(message) | Error::Surface(message) => classify_message(message),
            Error::Exhausted { last, .. } => last.category(),
            Error::Protection(inner) => inner.category(),
            Error::LicenseTimeout { .. } | Error::Timeout(_) => ErrorCategory::Timeout,
            Error::LicenseHttp { status } if *status >= 500 => ErrorCategory::Server,
            Error::Network(_) => ErrorCategory::Network,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Programmer-misuse signals. Never retried, never counted as runtime failures.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Disposed | Error::InvalidRequest(_) | Error::InvalidStateTransition { .. }
        )
    }

    /// Returns the error code for telemetry
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Disposed => "DISPOSED",
            Error::Aborted => "ABORTED",
            Error::Superseded { .. } => "SUPERSEDED",
            Error::Capability(_) => "CAPABILITY",
            Error::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Error::Adapter { .. } => "ADAPTER",
            Error::Exhausted { .. } => "SOURCES_EXHAUSTED",
            Error::Surface(_) => "SURFACE",
            Error::NoSupportedKeySystem { .. } => "DRM_UNSUPPORTED",
            Error::LicenseTimeout { .. } => "LICENSE_TIMEOUT",
            Error::LicenseHttp { .. } => "LICENSE_HTTP",
            Error::MalformedChallenge(_) => "LICENSE_CHALLENGE",
            Error::LicenseAcquisition(_) => "LICENSE_ACQUIRE",
            Error::Protection(_) => "PROTECTION",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::Network(_) => "NETWORK",
            Error::Timeout(_) => "TIMEOUT",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline"];
const SERVER_MARKERS: &[&str] = &[
    "server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];
const UNSUPPORTED_MARKERS: &[&str] = &[
    "unsupported",
    "not supported",
    "codec",
    "mime",
    "no decoder",
    "format error",
];
const NETWORK_MARKERS: &[&str] = &[
    "network",
    "fetch",
    "connection",
    "connect",
    "offline",
    "dns",
    "socket",
    "unreachable",
];

/// Heuristic classification of a free-form failure message.
///
/// Approximate by nature: adapters that know their failure category should
/// report it through [`Error::adapter_with`] instead.
pub fn classify_message(message: &str) -> ErrorCategory {
    let text = message.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| text.contains(m));

    if has(TIMEOUT_MARKERS) {
        ErrorCategory::Timeout
    } else if has(SERVER_MARKERS) || has_5xx_status(&text) {
        ErrorCategory::Server
    } else if has(UNSUPPORTED_MARKERS) {
        ErrorCategory::Unsupported
    } else if has(NETWORK_MARKERS) {
        ErrorCategory::Network
    } else {
        ErrorCategory::Unknown
    }
}

/// True when the text contains a standalone three digit 5xx status code.
fn has_5xx_status(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_digit())
        .any(|token| token.len() == 3 && token.starts_with('5'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message() {
        assert_eq!(classify_message("Request timed out"), ErrorCategory::Timeout);
        assert_eq!(classify_message("network timeout"), ErrorCategory::Timeout);
        assert_eq!(classify_message("HTTP 503 from origin"), ErrorCategory::Server);
        assert_eq!(classify_message("Bad Gateway"), ErrorCategory::Server);
        assert_eq!(classify_message("codec avc1.640028 unsupported"), ErrorCategory::Unsupported);
        assert_eq!(classify_message("Failed to fetch manifest"), ErrorCategory::Network);
        assert_eq!(classify_message("something odd"), ErrorCategory::Unknown);
        // 4-digit numbers are not status codes
        assert_eq!(classify_message("segment 5000 missing"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_explicit_category_wins() {
        let err = Error::adapter_with(ErrorCategory::Server, "connection reset");
        assert_eq!(err.category(), ErrorCategory::Server);

        let err = Error::adapter("connection reset");
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn test_protection_wrapping() {
        let err = Error::protection(Error::LicenseTimeout { timeout_ms: 15000 });
        assert!(err.to_string().starts_with("Content protection failed: "));
        assert_eq!(err.category(), ErrorCategory::Timeout);

        // wrapping twice does not stack prefixes
        let twice = Error::protection(err);
        assert_eq!(twice.to_string().matches("Content protection failed").count(), 1);
    }

    #[test]
    fn test_license_http_category() {
        assert_eq!(Error::LicenseHttp { status: 502 }.category(), ErrorCategory::Server);
        assert_eq!(Error::LicenseHttp { status: 403 }.category(), ErrorCategory::Unknown);
    }

    #[test]
    fn test_control_and_fatal() {
        assert!(Error::Aborted.category().is_control());
        assert!(Error::Superseded { request_id: 1, current: 2 }.category().is_control());
        assert!(Error::Disposed.is_fatal());
        assert!(!Error::Network("down".into()).is_fatal());
    }

    #[test]
    fn test_exhausted_message() {
        let err = Error::Exhausted {
            attempts: 4,
            sources: 2,
            last: Box::new(Error::adapter("boom")),
            failures: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "Playback failed after 4 attempts across 2 source(s): boom"
        );
        assert_eq!(err.error_code(), "SOURCES_EXHAUSTED");
    }
}
