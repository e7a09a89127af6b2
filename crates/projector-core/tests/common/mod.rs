//! Mock collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use projector_core::{
    Adapter, AdapterFactory, Capabilities, CapabilityProbe, Error, HookResult, KeySession,
    KeySystem, KeySystemAccess, LicenseRequest, LicenseRequestor, LoadContext, MediaKeys, Plugin,
    QualityLevel, Resolution, Result,
};
use projector_core::plugin::{Failover, RetryState, SourceLoadFailed, SourceLoaded};
use projector_core::registry::QualityCallback;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Adapters
// =============================================================================

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(&'static str),
    /// Fail this many loads (across instances), then succeed
    FailTimes(u32, &'static str),
    /// Succeed after the delay unless cancelled first
    Delay(Duration),
}

#[derive(Default)]
pub struct AdapterStats {
    pub created: AtomicU32,
    pub loads: AtomicU32,
    pub destroyed: AtomicU32,
    pub selected_quality: Mutex<Option<String>>,
    /// Quality callback handed to each load, in load order
    pub quality_callbacks: Mutex<Vec<QualityCallback>>,
}

impl AdapterStats {
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> u32 {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct MockFactory {
    id: &'static str,
    priority: i32,
    suffix: &'static str,
    behavior: Behavior,
    pub stats: Arc<AdapterStats>,
}

impl MockFactory {
    pub fn new(id: &'static str, suffix: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id,
            priority: 10,
            suffix,
            behavior,
            stats: Arc::new(AdapterStats::default()),
        })
    }
}

impl AdapterFactory for MockFactory {
    fn id(&self) -> &str {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, source: &str, _capabilities: &Capabilities) -> bool {
        source.ends_with(self.suffix)
    }

    fn create(&self) -> Box<dyn Adapter> {
        self.stats.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockAdapter {
            behavior: self.behavior.clone(),
            stats: self.stats.clone(),
            destroyed: false,
        })
    }
}

pub struct MockAdapter {
    behavior: Behavior,
    stats: Arc<AdapterStats>,
    destroyed: bool,
}

#[async_trait]
impl Adapter for MockAdapter {
    async fn load(&mut self, ctx: LoadContext) -> Result<()> {
        let index = self.stats.loads.fetch_add(1, Ordering::SeqCst);
        self.stats
            .quality_callbacks
            .lock()
            .push(ctx.on_quality_change.clone());

        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail(message) => return Err(Error::adapter(message)),
            Behavior::FailTimes(times, message) => {
                if index < times {
                    return Err(Error::adapter(message));
                }
            }
            Behavior::Delay(delay) => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Err(Error::Aborted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        ctx.surface.set_source(Some(&ctx.source));
        (ctx.on_quality_change)(QualityLevel::auto());
        Ok(())
    }

    fn destroy(&mut self) {
        assert!(!self.destroyed, "adapter destroyed twice");
        self.destroyed = true;
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        vec![
            QualityLevel::auto(),
            QualityLevel::from_resolution("720p", Resolution::new(1280, 720), 2_800_000),
        ]
    }

    fn set_quality(&mut self, id: &str) -> Result<()> {
        *self.stats.selected_quality.lock() = Some(id.to_string());
        Ok(())
    }
}

// =============================================================================
// Capability probes
// =============================================================================

pub struct CountingProbe {
    pub calls: AtomicU32,
    delay: Duration,
    fail_first: bool,
}

impl CountingProbe {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            fail_first: false,
        })
    }

    pub fn failing_once() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
            fail_first: true,
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProbe for CountingProbe {
    async fn resolve(&self) -> Result<Capabilities> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail_first && call == 0 {
            return Err(Error::Capability("probe exploded".to_string()));
        }
        Ok(Capabilities::full())
    }
}

// =============================================================================
// Content protection
// =============================================================================

#[derive(Default)]
pub struct MockKeySession {
    pub updates: Mutex<Vec<Vec<u8>>>,
    pub closed: AtomicU32,
}

#[async_trait]
impl KeySession for MockKeySession {
    fn session_id(&self) -> String {
        "mock-session".to_string()
    }

    async fn generate_request(&self, _init_data_type: &str, init_data: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(init_data))
    }

    async fn update(&self, license: &[u8]) -> Result<()> {
        self.updates.lock().push(license.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockKeys {
    system: KeySystem,
    session: Arc<MockKeySession>,
}

impl MediaKeys for MockKeys {
    fn key_system(&self) -> &KeySystem {
        &self.system
    }

    fn create_session(&self) -> Result<Arc<dyn KeySession>> {
        Ok(self.session.clone())
    }
}

pub struct MockKeyAccess {
    granted: Vec<KeySystem>,
    delay: Duration,
    pub requests: AtomicU32,
    pub session: Arc<MockKeySession>,
}

impl MockKeyAccess {
    pub fn granting(granted: Vec<KeySystem>) -> Arc<Self> {
        Self::slow(granted, Duration::ZERO)
    }

    /// Every access request takes `delay` to answer
    pub fn slow(granted: Vec<KeySystem>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            granted,
            delay,
            requests: AtomicU32::new(0),
            session: Arc::new(MockKeySession::default()),
        })
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u32 {
        self.session.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySystemAccess for MockKeyAccess {
    async fn request_access(&self, key_system: &KeySystem) -> Result<Arc<dyn MediaKeys>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.granted.contains(key_system) {
            Ok(Arc::new(MockKeys {
                system: key_system.clone(),
                session: self.session.clone(),
            }))
        } else {
            Err(Error::drm(format!("{key_system} unavailable")))
        }
    }
}

/// Never answers within any sane timeout
pub struct HangingRequestor;

#[async_trait]
impl LicenseRequestor for HangingRequestor {
    async fn request_license(
        &self,
        _request: LicenseRequest,
        cancel: CancellationToken,
    ) -> Result<Bytes> {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Aborted),
            _ = tokio::time::sleep(Duration::from_secs(3600)) => Ok(Bytes::new()),
        }
    }
}

// =============================================================================
// Plugins
// =============================================================================

#[derive(Default)]
pub struct RecordingPlugin {
    pub hooks: Mutex<Vec<String>>,
    pub failovers: Mutex<Vec<(String, String)>>,
    pub failures: Mutex<Vec<SourceLoadFailed>>,
    pub retries: Mutex<Vec<RetryState>>,
    pub errors: Mutex<Vec<Error>>,
    pub retry_scheduled: Notify,
}

impl RecordingPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, hook: &str) -> usize {
        self.hooks.lock().iter().filter(|h| h.as_str() == hook).count()
    }

    fn record(&self, hook: &str) {
        self.hooks.lock().push(hook.to_string());
    }
}

impl Plugin for RecordingPlugin {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_init(&self, _capabilities: &Capabilities) -> HookResult {
        self.record("init");
        Ok(())
    }

    fn on_source_loaded(&self, _event: &SourceLoaded) -> HookResult {
        self.record("source_loaded");
        Ok(())
    }

    fn on_source_load_failed(&self, event: &SourceLoadFailed) -> HookResult {
        self.record("source_load_failed");
        self.failures.lock().push(event.clone());
        Ok(())
    }

    fn on_retry(&self, event: &RetryState) -> HookResult {
        self.record("retry");
        self.retries.lock().push(event.clone());
        self.retry_scheduled.notify_one();
        Ok(())
    }

    fn on_failover(&self, event: &Failover) -> HookResult {
        self.record("failover");
        self.failovers
            .lock()
            .push((event.from_src.clone(), event.to_src.clone()));
        Ok(())
    }

    fn on_play(&self) -> HookResult {
        self.record("play");
        Ok(())
    }

    fn on_quality_change(&self, _level: &QualityLevel) -> HookResult {
        self.record("quality_change");
        Ok(())
    }

    fn on_error(&self, error: &Error) -> HookResult {
        self.record("error");
        self.errors.lock().push(error.clone());
        Ok(())
    }

    fn on_dispose(&self) -> HookResult {
        self.record("dispose");
        Ok(())
    }
}

pub struct PanickingPlugin;

impl Plugin for PanickingPlugin {
    fn name(&self) -> &str {
        "panicking"
    }

    fn on_play(&self) -> HookResult {
        panic!("on_play exploded");
    }

    fn on_source_loaded(&self, _event: &SourceLoaded) -> HookResult {
        anyhow::bail!("refusing to observe loads")
    }
}
