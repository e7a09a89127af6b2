//! Plugin notification bus
//!
//! Plugins observe engine lifecycle through optional hooks. Every hook has a
//! no-op default. Dispatch visits plugins in registration order and isolates
//! each call: a hook that returns an error or panics is logged with the plugin
//! and hook names, and delivery continues with the next plugin.

use crate::capabilities::Capabilities;
use crate::error::{Error, ErrorCategory};
use crate::types::{QualityLevel, RequestId};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Outcome of a plugin hook
pub type HookResult = anyhow::Result<()>;

/// An attempt against a candidate is starting
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLoadStart {
    pub request_id: RequestId,
    pub source: String,
    pub strategy: String,
    /// 0-indexed attempt within this candidate
    pub attempt: u32,
}

/// A candidate loaded and is now the active session
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLoaded {
    pub request_id: RequestId,
    pub source: String,
    pub strategy: String,
    pub attempt: u32,
}

/// One attempt against a candidate failed
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLoadFailed {
    pub request_id: RequestId,
    pub source: String,
    pub strategy: Option<String>,
    pub attempt: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub will_retry: bool,
}

/// A retry has been scheduled for a candidate
#[derive(Debug, Clone, PartialEq)]
pub struct RetryState {
    pub request_id: RequestId,
    pub source: String,
    /// Index of the attempt that will run after the delay
    pub attempt: u32,
    pub delay_ms: u64,
    /// Category of the failure that triggered the retry
    pub category: ErrorCategory,
}

/// The engine is moving on to the next candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Failover {
    pub request_id: RequestId,
    pub from_src: String,
    pub to_src: String,
    pub reason: String,
}

/// Lifecycle observer. Implement only the hooks you need.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn on_init(&self, capabilities: &Capabilities) -> HookResult {
        Ok(())
    }

    fn on_source_load_start(&self, event: &SourceLoadStart) -> HookResult {
        Ok(())
    }

    fn on_source_loaded(&self, event: &SourceLoaded) -> HookResult {
        Ok(())
    }

    fn on_source_load_failed(&self, event: &SourceLoadFailed) -> HookResult {
        Ok(())
    }

    fn on_retry(&self, event: &RetryState) -> HookResult {
        Ok(())
    }

    fn on_failover(&self, event: &Failover) -> HookResult {
        Ok(())
    }

    fn on_play(&self) -> HookResult {
        Ok(())
    }

    fn on_pause(&self) -> HookResult {
        Ok(())
    }

    fn on_time_update(&self, current: f64, duration: f64) -> HookResult {
        Ok(())
    }

    fn on_volume_change(&self, volume: f64, muted: bool) -> HookResult {
        Ok(())
    }

    fn on_quality_change(&self, level: &QualityLevel) -> HookResult {
        Ok(())
    }

    fn on_error(&self, error: &Error) -> HookResult {
        Ok(())
    }

    fn on_dispose(&self) -> HookResult {
        Ok(())
    }
}

/// Fault-isolating fan-out over an immutable plugin list
#[derive(Clone)]
pub struct PluginDispatcher {
    plugins: Arc<[Arc<dyn Plugin>]>,
}

impl PluginDispatcher {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            plugins: plugins.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn dispatch<F>(&self, hook: &'static str, call: F)
    where
        F: Fn(&dyn Plugin) -> HookResult,
    {
        for plugin in self.plugins.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| call(plugin.as_ref())));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(plugin = plugin.name(), hook, error = %err, "Plugin hook failed");
                }
                Err(payload) => {
                    warn!(
                        plugin = plugin.name(),
                        hook,
                        panic = %panic_message(payload.as_ref()),
                        "Plugin hook panicked"
                    );
                }
            }
        }
    }

    pub fn on_init(&self, capabilities: &Capabilities) {
        self.dispatch("on_init", |p| p.on_init(capabilities));
    }

    pub fn on_source_load_start(&self, event: &SourceLoadStart) {
        self.dispatch("on_source_load_start", |p| p.on_source_load_start(event));
    }

    pub fn on_source_loaded(&self, event: &SourceLoaded) {
        self.dispatch("on_source_loaded", |p| p.on_source_loaded(event));
    }

    pub fn on_source_load_failed(&self, event: &SourceLoadFailed) {
        self.dispatch("on_source_load_failed", |p| p.on_source_load_failed(event));
    }

    pub fn on_retry(&self, event: &RetryState) {
        self.dispatch("on_retry", |p| p.on_retry(event));
    }

    pub fn on_failover(&self, event: &Failover) {
        self.dispatch("on_failover", |p| p.on_failover(event));
    }

    pub fn on_play(&self) {
        self.dispatch("on_play", |p| p.on_play());
    }

    pub fn on_pause(&self) {
        self.dispatch("on_pause", |p| p.on_pause());
    }

    pub fn on_time_update(&self, current: f64, duration: f64) {
        self.dispatch("on_time_update", |p| p.on_time_update(current, duration));
    }

    pub fn on_volume_change(&self, volume: f64, muted: bool) {
        self.dispatch("on_volume_change", |p| p.on_volume_change(volume, muted));
    }

    pub fn on_quality_change(&self, level: &QualityLevel) {
        self.dispatch("on_quality_change", |p| p.on_quality_change(level));
    }

    pub fn on_error(&self, error: &Error) {
        self.dispatch("on_error", |p| p.on_error(error));
    }

    pub fn on_dispose(&self) {
        self.dispatch("on_dispose", |p| p.on_dispose());
    }
}

impl Default for PluginDispatcher {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
