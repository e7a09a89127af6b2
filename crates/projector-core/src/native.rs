//! Native adapter: hands the locator straight to the surface

use crate::capabilities::Capabilities;
use crate::error::{Error, Result};
use crate::registry::{Adapter, AdapterFactory, LoadContext};
use crate::source::SourceKind;
use crate::surface::PlaybackSurface;
use crate::types::QualityLevel;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Lowest-priority fallback strategy for directly playable sources
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAdapterFactory;

impl AdapterFactory for NativeAdapterFactory {
    fn id(&self) -> &str {
        "native"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn can_handle(&self, source: &str, capabilities: &Capabilities) -> bool {
        match SourceKind::detect(source) {
            SourceKind::Progressive => true,
            SourceKind::Hls => capabilities.native_hls,
            SourceKind::Dash => false,
        }
    }

    fn create(&self) -> Box<dyn Adapter> {
        Box::new(NativeAdapter::default())
    }
}

#[derive(Default)]
pub struct NativeAdapter {
    surface: Option<Arc<dyn PlaybackSurface>>,
}

#[async_trait]
impl Adapter for NativeAdapter {
    async fn load(&mut self, ctx: LoadContext) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        debug!(source = %ctx.source, kind = %ctx.kind, "Binding source to surface");
        ctx.surface.set_source(Some(&ctx.source));
        self.surface = Some(ctx.surface);
        (ctx.on_quality_change)(QualityLevel::auto());
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(surface) = self.surface.take() {
            surface.set_source(None);
        }
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        vec![QualityLevel::auto()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::MemorySurface;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_can_handle() {
        let factory = NativeAdapterFactory;
        let mut caps = Capabilities::default();

        assert!(factory.can_handle("movie.mp4", &caps));
        assert!(!factory.can_handle("live.m3u8", &caps));
        assert!(!factory.can_handle("vod.mpd", &caps));

        caps.native_hls = true;
        assert!(factory.can_handle("live.m3u8", &caps));
    }

    #[tokio::test]
    async fn test_load_and_destroy_binds_surface() {
        let surface = Arc::new(MemorySurface::new());
        let mut adapter = NativeAdapterFactory.create();

        let ctx = LoadContext {
            surface: surface.clone(),
            source: "movie.mp4".to_string(),
            kind: SourceKind::Progressive,
            capabilities: Arc::new(Capabilities::default()),
            cancel: CancellationToken::new(),
            on_quality_change: Arc::new(|_| {}),
        };

        adapter.load(ctx).await.unwrap();
        assert_eq!(surface.snapshot().source.as_deref(), Some("movie.mp4"));
        assert_eq!(adapter.quality_levels().len(), 1);

        adapter.destroy();
        assert_eq!(surface.snapshot().source, None);
    }
}
