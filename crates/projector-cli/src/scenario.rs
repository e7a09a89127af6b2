//! Scenario files and the scripted adapter they drive

use anyhow::{Context, Result};
use async_trait::async_trait;
use projector_core::{
    Adapter, AdapterFactory, Capabilities, Error, LoadContext, QualityLevel, Resolution,
    RetryPolicy, SurfaceConfig, SurfaceEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A scripted playback run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    /// Primary source first, fallbacks after
    pub sources: Vec<String>,
    pub retry_policy: Option<RetryPolicy>,
    pub surface: Option<SurfaceConfig>,
    pub capabilities: Capabilities,
    /// Per-source adapter behaviour, keyed by locator
    pub scripts: BTreeMap<String, SourceScript>,
    /// Cancel the primary request after this long
    pub abort_after_ms: Option<u64>,
    /// Issue a second request while the first is in flight
    pub supersede: Option<SupersedeStep>,
    /// Surface events replayed once loading settles
    pub playback: Vec<ScriptedEvent>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&content)
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        anyhow::ensure!(!scenario.sources.is_empty(), "Scenario has no sources");
        if let Some(step) = &scenario.supersede {
            anyhow::ensure!(!step.sources.is_empty(), "Superseding request has no sources");
        }
        Ok(scenario)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SupersedeStep {
    pub after_ms: u64,
    pub sources: Vec<String>,
}

/// Adapter behaviour for one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceScript {
    /// Delay before each attempt settles
    pub latency_ms: u64,
    /// `"ok"` or `"error: <message>"`, consumed one per attempt. The last
    /// entry repeats; an empty list always succeeds.
    pub outcomes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Fail(String),
}

impl Outcome {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("ok") {
            return Outcome::Ok;
        }
        let message = raw
            .strip_prefix("error:")
            .map(str::trim)
            .unwrap_or(raw);
        Outcome::Fail(message.to_string())
    }
}

/// Surface notifications a scenario can replay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptedEvent {
    Play,
    Pause,
    TimeUpdate { current: f64, duration: f64 },
    Progress { buffered_percent: f64 },
    VolumeChange { volume: f64, muted: bool },
    Error { message: String },
    /// Wait before the next event
    Wait { ms: u64 },
}

impl ScriptedEvent {
    pub fn to_surface_event(&self) -> Option<SurfaceEvent> {
        let event = match self {
            ScriptedEvent::Play => SurfaceEvent::Play,
            ScriptedEvent::Pause => SurfaceEvent::Pause,
            ScriptedEvent::TimeUpdate { current, duration } => SurfaceEvent::TimeUpdate {
                current: *current,
                duration: *duration,
            },
            ScriptedEvent::Progress { buffered_percent } => SurfaceEvent::Progress {
                buffered_percent: *buffered_percent,
            },
            ScriptedEvent::VolumeChange { volume, muted } => SurfaceEvent::VolumeChange {
                volume: *volume,
                muted: *muted,
            },
            ScriptedEvent::Error { message } => SurfaceEvent::Error {
                message: message.clone(),
            },
            ScriptedEvent::Wait { .. } => return None,
        };
        Some(event)
    }
}

struct ScriptCursor {
    script: SourceScript,
    next: AtomicUsize,
}

impl ScriptCursor {
    fn step(&self) -> Outcome {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        match self.script.outcomes.get(index).or(self.script.outcomes.last()) {
            Some(raw) => Outcome::parse(raw),
            None => Outcome::Ok,
        }
    }
}

/// Serves every scripted source; attempt counters span adapter instances
pub struct ScriptedAdapterFactory {
    scripts: BTreeMap<String, Arc<ScriptCursor>>,
}

impl ScriptedAdapterFactory {
    pub const ID: &'static str = "scripted";

    pub fn new(scripts: &BTreeMap<String, SourceScript>) -> Self {
        let scripts = scripts
            .iter()
            .map(|(source, script)| {
                let cursor = ScriptCursor {
                    script: script.clone(),
                    next: AtomicUsize::new(0),
                };
                (source.clone(), Arc::new(cursor))
            })
            .collect();
        Self { scripts }
    }
}

impl AdapterFactory for ScriptedAdapterFactory {
    fn id(&self) -> &str {
        Self::ID
    }

    fn priority(&self) -> i32 {
        100
    }

    fn can_handle(&self, source: &str, _capabilities: &Capabilities) -> bool {
        self.scripts.contains_key(source)
    }

    fn create(&self) -> Box<dyn Adapter> {
        Box::new(ScriptedAdapter {
            scripts: self.scripts.clone(),
            selected: None,
        })
    }
}

struct ScriptedAdapter {
    scripts: BTreeMap<String, Arc<ScriptCursor>>,
    selected: Option<String>,
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    async fn load(&mut self, ctx: LoadContext) -> projector_core::Result<()> {
        let Some(cursor) = self.scripts.get(&ctx.source).cloned() else {
            return Err(Error::adapter(format!("no script for {}", ctx.source)));
        };

        let latency = Duration::from_millis(cursor.script.latency_ms);
        if !latency.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Error::Aborted),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        match cursor.step() {
            Outcome::Ok => {
                ctx.surface.set_source(Some(&ctx.source));
                (ctx.on_quality_change)(QualityLevel::auto());
                Ok(())
            }
            Outcome::Fail(message) => Err(Error::adapter(message)),
        }
    }

    fn destroy(&mut self) {
        self.selected = None;
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        vec![
            QualityLevel::auto(),
            QualityLevel::from_resolution("1080p", Resolution::new(1920, 1080), 5_000_000),
            QualityLevel::from_resolution("720p", Resolution::new(1280, 720), 2_800_000),
        ]
    }

    fn set_quality(&mut self, id: &str) -> projector_core::Result<()> {
        self.selected = Some(id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parse() {
        assert_eq!(Outcome::parse("ok"), Outcome::Ok);
        assert_eq!(Outcome::parse(" OK "), Outcome::Ok);
        assert_eq!(
            Outcome::parse("error: HTTP 503"),
            Outcome::Fail("HTTP 503".to_string())
        );
        assert_eq!(
            Outcome::parse("connection reset"),
            Outcome::Fail("connection reset".to_string())
        );
    }

    #[test]
    fn test_cursor_repeats_last_outcome() {
        let cursor = ScriptCursor {
            script: SourceScript {
                latency_ms: 0,
                outcomes: vec!["error: timeout".to_string(), "ok".to_string()],
            },
            next: AtomicUsize::new(0),
        };
        assert_eq!(cursor.step(), Outcome::Fail("timeout".to_string()));
        assert_eq!(cursor.step(), Outcome::Ok);
        assert_eq!(cursor.step(), Outcome::Ok);

        let empty = ScriptCursor {
            script: SourceScript::default(),
            next: AtomicUsize::new(0),
        };
        assert_eq!(empty.step(), Outcome::Ok);
    }

    #[test]
    fn test_scenario_parse() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "sources": ["https://a.example/live.m3u8", "https://b.example/live.m3u8"],
                "scripts": {
                    "https://a.example/live.m3u8": { "outcomes": ["error: HTTP 503"] }
                },
                "playback": [{ "type": "play" }, { "type": "wait", "ms": 20 }]
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.sources.len(), 2);
        assert!(scenario.retry_policy.is_none());
        assert_eq!(scenario.playback.len(), 2);
        assert_eq!(scenario.playback[0].to_surface_event(), Some(SurfaceEvent::Play));
        assert!(scenario.playback[1].to_surface_event().is_none());

        let factory = ScriptedAdapterFactory::new(&scenario.scripts);
        let caps = Capabilities::default();
        assert!(factory.can_handle("https://a.example/live.m3u8", &caps));
        assert!(!factory.can_handle("https://b.example/live.m3u8", &caps));
    }
}
