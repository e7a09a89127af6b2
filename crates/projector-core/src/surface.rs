//! Playback surface abstraction
//!
//! The surface is the one shared resource of an engine: the element or handle
//! media is rendered into. Adapters bind sources to it, the license controller
//! attaches key sessions to it, and the engine observes its events.

use crate::drm::{KeySystem, MediaKeys};
use crate::error::Result;
use crate::types::SurfaceConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Raw notifications raised by the surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Play,
    Pause,
    TimeUpdate { current: f64, duration: f64 },
    Progress { buffered_percent: f64 },
    VolumeChange { volume: f64, muted: bool },
    Error { message: String },
    /// Encrypted media needs a license
    Encrypted { init_data_type: String, init_data: Vec<u8> },
}

/// Primitive operations the engine and adapters need from the surface
pub trait PlaybackSurface: Send + Sync {
    fn set_autoplay(&self, autoplay: bool);
    fn set_muted(&self, muted: bool);
    fn set_loop(&self, looping: bool);
    fn set_plays_inline(&self, inline: bool);
    fn set_poster(&self, poster: Option<&str>);

    /// Bind (or clear) a directly playable source
    fn set_source(&self, source: Option<&str>);

    /// Attach protection keys, or detach them with `None`
    fn attach_media_keys(&self, keys: Option<Arc<dyn MediaKeys>>) -> Result<()>;

    /// Start observing surface events
    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent>;
}

/// Apply static configuration in one pass
pub fn apply_config(surface: &dyn PlaybackSurface, config: &SurfaceConfig) {
    surface.set_autoplay(config.autoplay);
    surface.set_muted(config.muted);
    surface.set_loop(config.loop_playback);
    surface.set_plays_inline(config.plays_inline);
    surface.set_poster(config.poster.as_deref());
}

/// Observable state of a [`MemorySurface`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceState {
    pub autoplay: bool,
    pub muted: bool,
    pub loop_playback: bool,
    pub plays_inline: bool,
    pub poster: Option<String>,
    pub source: Option<String>,
    /// Key system of the attached keys, if any
    pub media_keys: Option<KeySystem>,
    pub keys_attached: u32,
    pub keys_detached: u32,
    pub config_applied: u32,
}

/// In-process surface for headless runs and tests
pub struct MemorySurface {
    state: Mutex<SurfaceState>,
    events: broadcast::Sender<SurfaceEvent>,
}

impl MemorySurface {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(SurfaceState::default()),
            events,
        }
    }

    pub fn snapshot(&self) -> SurfaceState {
        self.state.lock().clone()
    }

    /// Raise an event as if the underlying element fired it. Returns the
    /// number of listeners reached.
    pub fn emit(&self, event: SurfaceEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSurface for MemorySurface {
    fn set_autoplay(&self, autoplay: bool) {
        let mut state = self.state.lock();
        state.autoplay = autoplay;
        state.config_applied += 1;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().muted = muted;
    }

    fn set_loop(&self, looping: bool) {
        self.state.lock().loop_playback = looping;
    }

    fn set_plays_inline(&self, inline: bool) {
        self.state.lock().plays_inline = inline;
    }

    fn set_poster(&self, poster: Option<&str>) {
        self.state.lock().poster = poster.map(str::to_string);
    }

    fn set_source(&self, source: Option<&str>) {
        self.state.lock().source = source.map(str::to_string);
    }

    fn attach_media_keys(&self, keys: Option<Arc<dyn MediaKeys>>) -> Result<()> {
        let mut state = self.state.lock();
        match keys {
            Some(keys) => {
                state.media_keys = Some(keys.key_system().clone());
                state.keys_attached += 1;
            }
            None => {
                state.media_keys = None;
                state.keys_detached += 1;
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_config() {
        let surface = MemorySurface::new();
        let config = SurfaceConfig {
            autoplay: true,
            muted: true,
            loop_playback: true,
            plays_inline: false,
            poster: Some("poster.jpg".to_string()),
        };

        apply_config(&surface, &config);

        let state = surface.snapshot();
        assert!(state.autoplay);
        assert!(state.muted);
        assert!(state.loop_playback);
        assert!(!state.plays_inline);
        assert_eq!(state.poster.as_deref(), Some("poster.jpg"));
        assert_eq!(state.config_applied, 1);
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let surface = MemorySurface::new();
        assert_eq!(surface.emit(SurfaceEvent::Play), 0);

        let mut rx = surface.subscribe();
        assert_eq!(surface.emit(SurfaceEvent::Pause), 1);
        assert_eq!(rx.recv().await.unwrap(), SurfaceEvent::Pause);
    }
}
