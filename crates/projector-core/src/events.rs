//! Caller-facing engine events

use crate::capabilities::Capabilities;
use crate::error::{Error, ErrorCategory};
use crate::types::{QualityLevel, RequestId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// How a load request ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded {
        strategy: String,
        source: String,
    },
    Failed {
        category: ErrorCategory,
        message: String,
    },
    Aborted,
    Superseded,
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

/// Events published to engine subscribers
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Capabilities resolved; emitted once per engine
    Ready { capabilities: Arc<Capabilities> },
    Play,
    Pause,
    TimeUpdate { current: f64, duration: f64 },
    Progress { buffered_percent: f64 },
    VolumeChange { volume: f64, muted: bool },
    QualityChange { level: QualityLevel },
    Error { error: Error },
    LoadStart {
        request_id: RequestId,
        sources: Vec<String>,
        attempt_budget: u32,
    },
    LoadEnd {
        request_id: RequestId,
        outcome: LoadOutcome,
        /// Adapter attempts consumed, unresolvable candidates included
        attempts: u32,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Ready { .. } => "ready",
            EngineEvent::Play => "play",
            EngineEvent::Pause => "pause",
            EngineEvent::TimeUpdate { .. } => "timeupdate",
            EngineEvent::Progress { .. } => "progress",
            EngineEvent::VolumeChange { .. } => "volumechange",
            EngineEvent::QualityChange { .. } => "qualitychange",
            EngineEvent::Error { .. } => "error",
            EngineEvent::LoadStart { .. } => "loadstart",
            EngineEvent::LoadEnd { .. } => "loadend",
        }
    }
}

/// Broadcast fan-out of [`EngineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers. Events with no subscriber are dropped.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
