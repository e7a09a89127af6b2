//! Surface observer
//!
//! Translates raw surface notifications into engine events and plugin hooks.
//! Time and progress updates are coalesced to at most one emission per frame
//! and pass through the [`PlaybackSampler`] thresholds.

use crate::error::Error;
use crate::events::{EngineEvent, EventBus};
use crate::plugin::PluginDispatcher;
use crate::sampler::{PlaybackSampler, SamplingConfig};
use crate::surface::SurfaceEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub struct SurfaceObserver {
    events: EventBus,
    dispatcher: PluginDispatcher,
    sampler: PlaybackSampler,
    frame_interval: Duration,
    pending_time: Option<(f64, f64)>,
    pending_progress: Option<f64>,
    /// Bumped by the engine whenever a new session is installed
    generation: Arc<AtomicU64>,
    seen_generation: u64,
}

impl SurfaceObserver {
    pub fn new(
        events: EventBus,
        dispatcher: PluginDispatcher,
        sampling: SamplingConfig,
        frame_interval: Duration,
    ) -> Self {
        Self {
            events,
            dispatcher,
            sampler: PlaybackSampler::new(sampling),
            frame_interval,
            pending_time: None,
            pending_progress: None,
            generation: Arc::new(AtomicU64::new(0)),
            seen_generation: 0,
        }
    }

    /// Forget sampled values whenever `generation` moves
    pub fn with_session_generation(mut self, generation: Arc<AtomicU64>) -> Self {
        self.seen_generation = generation.load(Ordering::SeqCst);
        self.generation = generation;
        self
    }

    /// Run until `cancel` fires or the surface goes away
    pub fn spawn(
        mut self,
        mut surface_events: broadcast::Receiver<SurfaceEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut flush_at: Option<Instant> = None;

            loop {
                let deadline = flush_at;
                let frame = async move {
                    match deadline {
                        Some(at) => sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = frame => {
                        flush_at = None;
                        self.flush();
                    }
                    event = surface_events.recv() => match event {
                        Ok(event) => {
                            if self.handle(event) && flush_at.is_none() {
                                flush_at = Some(Instant::now() + self.frame_interval);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Surface observer lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Surface observer stopped");
        })
    }

    /// Returns true when a value was queued for the next frame
    fn handle(&mut self, event: SurfaceEvent) -> bool {
        match event {
            SurfaceEvent::TimeUpdate { current, duration } => {
                self.pending_time = Some((current, duration));
                true
            }
            SurfaceEvent::Progress { buffered_percent } => {
                self.pending_progress = Some(buffered_percent);
                true
            }
            SurfaceEvent::Play => {
                self.events.emit(EngineEvent::Play);
                self.dispatcher.on_play();
                false
            }
            SurfaceEvent::Pause => {
                self.events.emit(EngineEvent::Pause);
                self.dispatcher.on_pause();
                false
            }
            SurfaceEvent::VolumeChange { volume, muted } => {
                self.events.emit(EngineEvent::VolumeChange { volume, muted });
                self.dispatcher.on_volume_change(volume, muted);
                false
            }
            SurfaceEvent::Error { message } => {
                let error = Error::Surface(message);
                self.dispatcher.on_error(&error);
                self.events.emit(EngineEvent::Error { error });
                false
            }
            // answered by the license controller
            SurfaceEvent::Encrypted { .. } => false,
        }
    }

    fn flush(&mut self) {
        let generation = self.generation.load(Ordering::SeqCst);
        if generation != self.seen_generation {
            trace!(generation, "New session, resetting sampler");
            self.seen_generation = generation;
            self.sampler.reset();
        }

        if let Some((current, duration)) = self.pending_time.take() {
            if self.sampler.accept_time(current, duration) {
                trace!(current, duration, "Time update");
                self.events.emit(EngineEvent::TimeUpdate { current, duration });
                self.dispatcher.on_time_update(current, duration);
            }
        }
        if let Some(buffered_percent) = self.pending_progress.take() {
            if self.sampler.accept_progress(buffered_percent) {
                self.events.emit(EngineEvent::Progress { buffered_percent });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{MemorySurface, PlaybackSurface};

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_updates_coalesce_per_frame() {
        let surface = MemorySurface::new();
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();

        let observer = SurfaceObserver::new(
            bus,
            PluginDispatcher::default(),
            SamplingConfig::default(),
            Duration::from_millis(16),
        );
        let handle = observer.spawn(surface.subscribe(), cancel.clone());

        for i in 0..5 {
            surface.emit(SurfaceEvent::TimeUpdate {
                current: 1.0 + i as f64 * 0.01,
                duration: 60.0,
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            EngineEvent::TimeUpdate { current, duration } => {
                assert!((current - 1.04).abs() < 1e-9);
                assert_eq!(*duration, 60.0);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // below threshold: nothing new
        surface.emit(SurfaceEvent::TimeUpdate {
            current: 1.06,
            duration: 60.0,
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut rx).is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_resets_thresholds() {
        let surface = MemorySurface::new();
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();
        let generation = Arc::new(AtomicU64::new(0));

        let observer = SurfaceObserver::new(
            bus,
            PluginDispatcher::default(),
            SamplingConfig::default(),
            Duration::from_millis(16),
        )
        .with_session_generation(generation.clone());
        let _handle = observer.spawn(surface.subscribe(), cancel.clone());

        let update = SurfaceEvent::TimeUpdate {
            current: 0.0,
            duration: 30.0,
        };
        surface.emit(update.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drain(&mut rx).len(), 1);

        // same values from the same session are swallowed
        surface.emit(update.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut rx).is_empty());

        generation.fetch_add(1, Ordering::SeqCst);
        surface.emit(update);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let names: Vec<_> = drain(&mut rx).iter().map(EngineEvent::name).collect();
        assert_eq!(names, vec!["timeupdate"]);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_discrete_events_pass_through() {
        let surface = MemorySurface::new();
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();

        let observer = SurfaceObserver::new(
            bus,
            PluginDispatcher::default(),
            SamplingConfig::default(),
            Duration::from_millis(16),
        );
        let _handle = observer.spawn(surface.subscribe(), cancel.clone());

        surface.emit(SurfaceEvent::Play);
        surface.emit(SurfaceEvent::VolumeChange {
            volume: 0.5,
            muted: false,
        });
        surface.emit(SurfaceEvent::Error {
            message: "decode failure".to_string(),
        });
        surface.emit(SurfaceEvent::Encrypted {
            init_data_type: "cenc".to_string(),
            init_data: vec![1, 2, 3],
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let names: Vec<_> = drain(&mut rx).iter().map(EngineEvent::name).collect();
        assert_eq!(names, vec!["play", "volumechange", "error"]);
        cancel.cancel();
    }
}
