//! Adapter registry
//!
//! Adapters are pluggable strategies that bind one kind of source to the
//! playback surface. Factories are kept in descending priority order; equal
//! priorities keep their registration order.

use crate::capabilities::Capabilities;
use crate::error::Result;
use crate::native::NativeAdapterFactory;
use crate::source::SourceKind;
use crate::surface::PlaybackSurface;
use crate::types::{QualityLevel, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Invoked by adapters whenever the rendered quality changes
pub type QualityCallback = Arc<dyn Fn(QualityLevel) + Send + Sync>;

/// Everything an adapter receives for one load attempt
#[derive(Clone)]
pub struct LoadContext {
    pub surface: Arc<dyn PlaybackSurface>,
    pub source: String,
    pub kind: SourceKind,
    pub capabilities: Arc<Capabilities>,
    /// Fires when the attempt is aborted or superseded
    pub cancel: CancellationToken,
    pub on_quality_change: QualityCallback,
}

/// A live binding of one source to the surface
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Bind the source. Should return promptly once `ctx.cancel` fires.
    async fn load(&mut self, ctx: LoadContext) -> Result<()>;

    /// Release everything the adapter holds. Called exactly once per instance.
    fn destroy(&mut self);

    fn quality_levels(&self) -> Vec<QualityLevel> {
        Vec::new()
    }

    fn set_quality(&mut self, _id: &str) -> Result<()> {
        Ok(())
    }
}

/// Creates adapters for the sources it can handle
pub trait AdapterFactory: Send + Sync {
    /// Strategy identifier
    fn id(&self) -> &str;

    /// Higher wins
    fn priority(&self) -> i32;

    fn can_handle(&self, source: &str, capabilities: &Capabilities) -> bool;

    fn create(&self) -> Box<dyn Adapter>;
}

/// A candidate source paired with the factory selected for it
#[derive(Clone)]
pub struct CandidateResolution {
    pub source: String,
    pub factory: Option<Arc<dyn AdapterFactory>>,
}

impl CandidateResolution {
    pub fn strategy(&self) -> Option<&str> {
        self.factory.as_deref().map(|f| f.id())
    }

    /// Attempts this candidate may consume under `policy`
    pub fn attempt_budget(&self, policy: &RetryPolicy) -> u32 {
        if self.factory.is_some() {
            policy.attempt_limit()
        } else {
            1
        }
    }
}

impl std::fmt::Debug for CandidateResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateResolution")
            .field("source", &self.source)
            .field("strategy", &self.strategy())
            .finish()
    }
}

/// Total attempt budget of a resolved candidate list
pub fn attempt_budget(candidates: &[CandidateResolution], policy: &RetryPolicy) -> u32 {
    candidates.iter().map(|c| c.attempt_budget(policy)).sum()
}

/// Prioritised list of adapter factories
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: Vec<Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the native surface adapter
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NativeAdapterFactory));
        registry
    }

    /// Append a factory and restore priority order
    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        self.factories.push(factory);
        // sort_by is stable: equal priorities keep insertion order
        self.factories
            .sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    /// First factory, in priority order, that can handle the source
    pub fn resolve(
        &self,
        source: &str,
        capabilities: &Capabilities,
    ) -> Option<Arc<dyn AdapterFactory>> {
        self.factories
            .iter()
            .find(|f| f.can_handle(source, capabilities))
            .cloned()
    }

    /// Resolve every candidate up front
    pub fn resolve_all(
        &self,
        sources: &[String],
        capabilities: &Capabilities,
    ) -> Vec<CandidateResolution> {
        sources
            .iter()
            .map(|source| CandidateResolution {
                source: source.clone(),
                factory: self.resolve(source, capabilities),
            })
            .collect()
    }

    pub fn list(&self) -> &[Arc<dyn AdapterFactory>] {
        &self.factories
    }

    pub fn ids(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullAdapter;

    #[async_trait]
    impl Adapter for NullAdapter {
        async fn load(&mut self, _ctx: LoadContext) -> Result<()> {
            Ok(())
        }

        fn destroy(&mut self) {}
    }

    struct KindFactory {
        id: &'static str,
        priority: i32,
        kind: SourceKind,
    }

    impl AdapterFactory for KindFactory {
        fn id(&self) -> &str {
            self.id
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn can_handle(&self, source: &str, capabilities: &Capabilities) -> bool {
            let kind = SourceKind::detect(source);
            kind == self.kind && capabilities.supports(kind)
        }

        fn create(&self) -> Box<dyn Adapter> {
            Box::new(NullAdapter)
        }
    }

    fn factory(id: &'static str, priority: i32, kind: SourceKind) -> Arc<dyn AdapterFactory> {
        Arc::new(KindFactory { id, priority, kind })
    }

    #[test]
    fn test_priority_order_is_stable() {
        let mut registry = AdapterRegistry::new();
        registry.register(factory("low", 1, SourceKind::Hls));
        registry.register(factory("first-high", 10, SourceKind::Hls));
        registry.register(factory("second-high", 10, SourceKind::Hls));
        registry.register(factory("mid", 5, SourceKind::Hls));

        assert_eq!(registry.ids(), vec!["first-high", "second-high", "mid", "low"]);
    }

    #[test]
    fn test_resolve_picks_first_capable() {
        let mut registry = AdapterRegistry::new();
        registry.register(factory("dash", 20, SourceKind::Dash));
        registry.register(factory("hls", 10, SourceKind::Hls));

        let caps = Capabilities::full();
        let resolved = registry.resolve("https://cdn/x.m3u8", &caps).unwrap();
        assert_eq!(resolved.id(), "hls");

        // capabilities gate resolution
        let caps = Capabilities::default();
        assert!(registry.resolve("https://cdn/x.m3u8", &caps).is_none());
    }

    #[test]
    fn test_attempt_budget() {
        let mut registry = AdapterRegistry::new();
        registry.register(factory("hls", 10, SourceKind::Hls));

        let sources = vec!["a.m3u8".to_string(), "b.mpd".to_string()];
        let candidates = registry.resolve_all(&sources, &Capabilities::full());
        let policy = RetryPolicy::default().with_max_retries(2);

        assert_eq!(candidates[0].strategy(), Some("hls"));
        assert_eq!(candidates[1].strategy(), None);
        assert_eq!(attempt_budget(&candidates, &policy), 3 + 1);
    }

    #[test]
    fn test_defaults_include_native() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(registry.ids(), vec!["native"]);
    }
}
