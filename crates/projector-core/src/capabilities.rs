//! Environment capabilities and the probe that reports them

use crate::error::Result;
use crate::source::SourceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Class of device the engine is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
    Tv,
    Unknown,
}

/// What the runtime environment supports. Resolved once per engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Delivery formats the environment can play through some adapter
    pub protocols: Vec<SourceKind>,
    pub device: DeviceClass,
    /// The surface plays HLS without a script adapter
    pub native_hls: bool,
    /// Media Source Extensions style buffer appending is available
    pub media_source: bool,
    /// Key systems the environment advertises
    pub key_systems: Vec<String>,
}

impl Capabilities {
    pub fn supports(&self, kind: SourceKind) -> bool {
        self.protocols.contains(&kind) || (kind == SourceKind::Hls && self.native_hls)
    }

    /// Everything on, desktop class. Convenient for tests and demos.
    pub fn full() -> Self {
        Self {
            protocols: vec![SourceKind::Hls, SourceKind::Dash, SourceKind::Progressive],
            device: DeviceClass::Desktop,
            native_hls: false,
            media_source: true,
            key_systems: Vec::new(),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            protocols: vec![SourceKind::Progressive],
            device: DeviceClass::Unknown,
            native_hls: false,
            media_source: false,
            key_systems: Vec::new(),
        }
    }
}

/// Collaborator reporting environment capabilities
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn resolve(&self) -> Result<Capabilities>;
}

/// Probe that always reports the same capabilities
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilityProbe {
    capabilities: Capabilities,
}

impl StaticCapabilityProbe {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl CapabilityProbe for StaticCapabilityProbe {
    async fn resolve(&self) -> Result<Capabilities> {
        Ok(self.capabilities.clone())
    }
}
