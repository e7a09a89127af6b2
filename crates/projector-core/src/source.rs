//! Source locator handling: kind detection and candidate list normalisation

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// Delivery format of a source locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Hls,
    Dash,
    /// Plain file (mp4, webm, ...) the surface can play directly
    Progressive,
}

impl SourceKind {
    /// Detect the kind of a locator from its path extension.
    ///
    /// Query strings and fragments are ignored. Relative locators are accepted.
    pub fn detect(locator: &str) -> SourceKind {
        let path = match Url::parse(locator) {
            Ok(url) => url.path().to_lowercase(),
            Err(_) => locator
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_lowercase(),
        };

        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            return SourceKind::Hls;
        }
        if path.ends_with(".mpd") {
            return SourceKind::Dash;
        }
        SourceKind::Progressive
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Hls => "hls",
            SourceKind::Dash => "dash",
            SourceKind::Progressive => "progressive",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trim, drop empties and deduplicate, keeping first occurrence order.
pub fn normalize_sources<I, S>(sources: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    sources
        .into_iter()
        .filter_map(|s| {
            let trimmed = s.as_ref().trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
