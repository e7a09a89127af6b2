//! Projector Core - Playback orchestration for Projector
//!
//! This crate turns a playback request into a live, protected, observable
//! media session:
//! - Adapter registry with prioritised, pluggable source strategies
//! - Bounded, jittered exponential backoff per candidate source
//! - Ordered failover across fallback sources
//! - Content protection (EME-style) license negotiation with timeout
//! - Fault-isolating plugin notification bus
//! - Supersession of in-flight loads by newer requests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Projector Core                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │  Capability  │  │   Adapter    │  │   Backoff    │           │
//! │  │    Probe     │  │   Registry   │  │  Calculator  │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │   Engine    │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │    Plugin    │  │    Event    │  │   License    │            │
//! │  │  Dispatcher  │  │     Bus     │  │  Controller  │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backoff;
pub mod capabilities;
pub mod config;
pub mod drm;
pub mod engine;
pub mod error;
pub mod events;
pub mod native;
pub mod observer;
pub mod plugin;
pub mod registry;
pub mod sampler;
pub mod source;
pub mod surface;
pub mod types;

pub use backoff::calculate_delay;
pub use capabilities::{Capabilities, CapabilityProbe, DeviceClass, StaticCapabilityProbe};
pub use config::EngineConfig;
pub use drm::{
    HttpLicenseRequestor, KeySession, KeySystem, KeySystemAccess, KeySystemOption,
    LicenseController, LicenseRequest, LicenseRequestor, LicenseState, MediaKeys,
    ProtectionConfig, ProtectionSession,
};
pub use engine::{EngineBuilder, LoadSuccess, PlaybackEngine};
pub use error::{classify_message, Error, ErrorCategory, FailureRecord, Result};
pub use events::{EngineEvent, EventBus, LoadOutcome};
pub use native::NativeAdapterFactory;
pub use plugin::{HookResult, Plugin, PluginDispatcher};
pub use registry::{Adapter, AdapterFactory, AdapterRegistry, CandidateResolution, LoadContext};
pub use source::SourceKind;
pub use surface::{MemorySurface, PlaybackSurface, SurfaceEvent};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
