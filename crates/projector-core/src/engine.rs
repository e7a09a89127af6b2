//! Playback Engine - orchestrates one playback surface
//!
//! Coordinates:
//! - Capability resolution (once per engine)
//! - Content protection negotiation
//! - Adapter selection, bounded retries and ordered failover
//! - Supersession of in-flight loads
//! - Event and plugin notification
//!
//! Every load request captures the engine epoch it started in. Each suspension
//! point re-checks that epoch and the request's cancellation signal before any
//! shared state is touched, so a stale load can never clobber a newer one.

use crate::capabilities::{CapabilityProbe, Capabilities};
use crate::config::EngineConfig;
use crate::drm::{
    HttpLicenseRequestor, KeySystem, KeySystemAccess, LicenseController, LicenseRequestor,
    LicenseState, ProtectionConfig, ProtectionErrorSink, ProtectionSession,
};
use crate::error::{Error, ErrorCategory, FailureRecord, Result};
use crate::events::{EngineEvent, EventBus, LoadOutcome};
use crate::observer::SurfaceObserver;
use crate::plugin::{
    Failover, Plugin, PluginDispatcher, RetryState, SourceLoadFailed, SourceLoadStart,
    SourceLoaded,
};
use crate::registry::{
    attempt_budget, Adapter, AdapterFactory, AdapterRegistry, CandidateResolution, LoadContext,
    QualityCallback,
};
use crate::source::SourceKind;
use crate::surface::{apply_config, PlaybackSurface};
use crate::types::{PlaybackRequest, QualityLevel, RequestId, RetryPolicy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A completed load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSuccess {
    pub request_id: RequestId,
    pub strategy: String,
    pub source: String,
    /// Attempts consumed across all candidates, the winning one included
    pub attempts: u32,
}

/// The adapter currently bound to the surface
struct ActiveSession {
    adapter: Box<dyn Adapter>,
    strategy: String,
    source: String,
    request_id: RequestId,
    gate: Arc<SessionGate>,
}

impl ActiveSession {
    fn destroy(&mut self) {
        self.gate.retire();
        self.adapter.destroy();
    }
}

/// Whether one adapter instance may still publish quality changes.
///
/// Before install an attempt publishes only while its request is current.
/// Once installed it publishes until the session is torn down, whatever
/// later requests do to the epoch.
#[derive(Default)]
struct SessionGate {
    installed: AtomicBool,
    retired: AtomicBool,
}

impl SessionGate {
    fn install(&self) {
        self.installed.store(true, Ordering::SeqCst);
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn is_open(&self, epoch: &AtomicU64, request_id: RequestId) -> bool {
        if self.retired.load(Ordering::SeqCst) {
            return false;
        }
        self.installed.load(Ordering::SeqCst) || epoch.load(Ordering::SeqCst) == request_id
    }
}

/// Builder for [`PlaybackEngine`]
pub struct EngineBuilder {
    surface: Arc<dyn PlaybackSurface>,
    probe: Arc<dyn CapabilityProbe>,
    registry: AdapterRegistry,
    plugins: Vec<Arc<dyn Plugin>>,
    key_access: Option<Arc<dyn KeySystemAccess>>,
    requestor: Option<Arc<dyn LicenseRequestor>>,
    config: EngineConfig,
    rng_seed: Option<u64>,
}

impl EngineBuilder {
    pub fn new(surface: Arc<dyn PlaybackSurface>, probe: Arc<dyn CapabilityProbe>) -> Self {
        Self {
            surface,
            probe,
            registry: AdapterRegistry::with_defaults(),
            plugins: Vec::new(),
            key_access: None,
            requestor: None,
            config: EngineConfig::default(),
            rng_seed: None,
        }
    }

    /// Replace the default registry (native adapter only)
    pub fn registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn adapter(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.registry.register(factory);
        self
    }

    /// Plugins are notified in the order they are added
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn key_system_access(mut self, access: Arc<dyn KeySystemAccess>) -> Self {
        self.key_access = Some(access);
        self
    }

    /// Override the default HTTP license exchange
    pub fn license_requestor(mut self, requestor: Arc<dyn LicenseRequestor>) -> Self {
        self.requestor = Some(requestor);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed retry jitter for reproducible schedules
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the engine and start observing the surface.
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<PlaybackEngine> {
        let config = self.config.validated()?;
        let events = EventBus::new(config.event_capacity);
        let dispatcher = PluginDispatcher::new(self.plugins);
        let lifetime = CancellationToken::new();
        let session_generation = Arc::new(AtomicU64::new(0));

        let observer = SurfaceObserver::new(
            events.clone(),
            dispatcher.clone(),
            config.sampling(),
            config.frame_interval(),
        )
        .with_session_generation(session_generation.clone())
        .spawn(self.surface.subscribe(), lifetime.child_token());

        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let engine = PlaybackEngine {
            id: Uuid::new_v4(),
            config,
            surface: self.surface,
            probe: self.probe,
            registry: self.registry,
            dispatcher,
            key_access: self.key_access,
            requestor: self
                .requestor
                .unwrap_or_else(|| Arc::new(HttpLicenseRequestor::new())),
            capabilities: OnceCell::new(),
            epoch: Arc::new(AtomicU64::new(0)),
            session_generation,
            current_load: parking_lot::Mutex::new(None),
            active: Mutex::new(None),
            protection: Mutex::new(None),
            events,
            rng: parking_lot::Mutex::new(rng),
            lifetime,
            observer: parking_lot::Mutex::new(Some(observer)),
            disposed: AtomicBool::new(false),
        };

        info!(
            engine = %engine.id,
            adapters = ?engine.registry.ids(),
            plugins = ?engine.dispatcher.names(),
            "Playback engine created"
        );
        Ok(engine)
    }
}

/// Epoch and cancellation snapshot of one load request
struct LoadGuard {
    request_id: RequestId,
    epoch: Arc<AtomicU64>,
    caller: Option<CancellationToken>,
    /// Cancelled on supersession, cleanup, disposal or caller abort
    token: CancellationToken,
    link: Option<JoinHandle<()>>,
}

impl LoadGuard {
    fn check(&self) -> Result<()> {
        let current = self.epoch.load(Ordering::SeqCst);
        if current != self.request_id {
            return Err(Error::Superseded {
                request_id: self.request_id,
                current,
            });
        }
        if self.token.is_cancelled() || self.caller_cancelled() {
            return Err(Error::Aborted);
        }
        Ok(())
    }

    fn caller_cancelled(&self) -> bool {
        self.caller.as_ref().is_some_and(|c| c.is_cancelled())
    }

    fn interruption(&self) -> Error {
        self.check().err().unwrap_or(Error::Aborted)
    }

    async fn interrupted(&self) {
        match &self.caller {
            Some(caller) => {
                tokio::select! {
                    _ = caller.cancelled() => {}
                    _ = self.token.cancelled() => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Race `work` against supersession and abort
    async fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.interrupted() => Err(self.interruption()),
            result = work => result,
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await?;
        self.check()
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.abort();
        }
    }
}

/// Attempt accounting for one load request
#[derive(Default)]
struct AttemptTally {
    attempts: u32,
    failures: Vec<FailureRecord>,
}

impl AttemptTally {
    fn record(&mut self, source: &str, attempt: u32, error: &Error) {
        self.failures.push(FailureRecord {
            source: source.to_string(),
            attempt,
            category: error.category(),
            message: error.to_string(),
        });
    }
}

/// Top-level coordinator owning the active adapter and protection session
pub struct PlaybackEngine {
    id: Uuid,
    config: EngineConfig,
    surface: Arc<dyn PlaybackSurface>,
    probe: Arc<dyn CapabilityProbe>,
    registry: AdapterRegistry,
    dispatcher: PluginDispatcher,
    key_access: Option<Arc<dyn KeySystemAccess>>,
    requestor: Arc<dyn LicenseRequestor>,
    capabilities: OnceCell<Arc<Capabilities>>,
    epoch: Arc<AtomicU64>,
    /// Bumped on every install so sampling restarts for the new source
    session_generation: Arc<AtomicU64>,
    current_load: parking_lot::Mutex<Option<CancellationToken>>,
    active: Mutex<Option<ActiveSession>>,
    protection: Mutex<Option<ProtectionSession>>,
    events: EventBus,
    rng: parking_lot::Mutex<StdRng>,
    lifetime: CancellationToken,
    observer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl PlaybackEngine {
    pub fn builder(
        surface: Arc<dyn PlaybackSurface>,
        probe: Arc<dyn CapabilityProbe>,
    ) -> EngineBuilder {
        EngineBuilder::new(surface, probe)
    }

    /// Identity and configuration stay readable after disposal
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current request epoch
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Receive engine events from now on. Fails once disposed.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<EngineEvent>> {
        self.ensure_live()?;
        Ok(self.events.subscribe())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Resolve capabilities. Runs the probe at most once per engine; concurrent
    /// callers share the in-flight resolution. A failed probe may be retried.
    #[instrument(skip(self), fields(engine = %self.id))]
    pub async fn initialize(&self) -> Result<Arc<Capabilities>> {
        self.ensure_live()?;

        let capabilities = self
            .capabilities
            .get_or_try_init(|| async {
                let capabilities = self.probe.resolve().await.map_err(|err| match err {
                    Error::Capability(_) => err,
                    other => Error::Capability(other.to_string()),
                })?;
                let capabilities = Arc::new(capabilities);

                info!(
                    protocols = ?capabilities.protocols,
                    device = ?capabilities.device,
                    "Capabilities resolved"
                );
                self.dispatcher.on_init(&capabilities);
                self.events.emit(EngineEvent::Ready {
                    capabilities: capabilities.clone(),
                });
                Ok::<_, Error>(capabilities)
            })
            .await?;

        Ok(capabilities.clone())
    }

    /// Start a new epoch, superseding whatever load was in flight
    fn supersede(&self) -> (RequestId, CancellationToken) {
        let mut current = self.current_load.lock();
        let request_id = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = current.take() {
            previous.cancel();
        }
        let token = self.lifetime.child_token();
        *current = Some(token.clone());
        (request_id, token)
    }

    fn begin_load(&self, caller: Option<&CancellationToken>) -> LoadGuard {
        let (request_id, token) = self.supersede();

        // adapters watch a single token; forward caller aborts into it
        let link = caller.map(|caller| {
            let caller = caller.clone();
            let token = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => token.cancel(),
                    _ = token.cancelled() => {}
                }
            })
        });

        LoadGuard {
            request_id,
            epoch: self.epoch.clone(),
            caller: caller.cloned(),
            token,
            link,
        }
    }

    /// Load a playback request, trying candidates in order with bounded
    /// retries. Resolves once an adapter is active.
    #[instrument(skip(self, request), fields(engine = %self.id))]
    pub async fn load_source(&self, request: PlaybackRequest) -> Result<LoadSuccess> {
        self.ensure_live()?;
        let guard = self.begin_load(request.cancel_token());
        if guard.caller_cancelled() {
            debug!(request_id = guard.request_id, "Load aborted before start");
            return Err(Error::Aborted);
        }

        let capabilities = guard.run(self.initialize()).await?;
        guard.check()?;

        self.teardown_sessions().await;
        guard.check()?;

        let surface_config = request.surface_config().unwrap_or(&self.config.surface);
        apply_config(self.surface.as_ref(), surface_config);

        if let Some(protection) = request.protection().filter(|p| p.is_active()) {
            self.establish_protection(&guard, protection.clone()).await?;
        }

        let policy = request
            .retry_policy()
            .cloned()
            .unwrap_or_else(|| self.config.default_retry_policy.clone());
        let candidates = self.registry.resolve_all(request.sources(), &capabilities);

        self.run_candidates(&guard, &candidates, &policy, &capabilities)
            .await
    }

    async fn establish_protection(&self, guard: &LoadGuard, config: ProtectionConfig) -> Result<()> {
        let Some(access) = self.key_access.clone() else {
            return Err(self.protection_failure(Error::drm(
                "protection requested but no key system access is configured",
            )));
        };

        // owned by the protection session; the load guard interrupts negotiation
        let controller = Arc::new(
            LicenseController::new(config, self.surface.clone(), access, self.requestor.clone())
                .with_default_timeout(self.config.license_timeout())
                .with_cancel_token(self.lifetime.child_token()),
        );

        let established = guard
            .run(controller.establish())
            .await
            .and_then(|()| guard.check());
        if let Err(err) = established {
            controller.teardown();
            if err.category().is_control() {
                debug!(request_id = guard.request_id, error = %err, "Protection abandoned");
                return Err(err);
            }
            return Err(self.protection_failure(err));
        }

        let Some(key_system) = controller.key_system() else {
            controller.teardown();
            return Err(self.protection_failure(Error::drm("no key system negotiated")));
        };

        let sink: ProtectionErrorSink = {
            let events = self.events.clone();
            let dispatcher = self.dispatcher.clone();
            Arc::new(move |err: Error| {
                let err = Error::protection(err);
                warn!(error = %err, "License exchange failed");
                dispatcher.on_error(&err);
                events.emit(EngineEvent::Error { error: err });
            })
        };
        info!(
            request_id = guard.request_id,
            key_system = %key_system,
            "Protection session established"
        );
        let session = ProtectionSession::new(key_system, controller.clone(), controller.listen(sink));

        let mut slot = self.protection.lock().await;
        // dropping the session tears it down
        guard.check()?;
        if let Some(mut previous) = slot.replace(session) {
            previous.teardown();
        }
        Ok(())
    }

    /// Wrap, log and publish a protection failure
    fn protection_failure(&self, err: Error) -> Error {
        let err = Error::protection(err);
        warn!(error = %err, "Content protection failed");
        self.dispatcher.on_error(&err);
        self.events.emit(EngineEvent::Error { error: err.clone() });
        err
    }

    async fn run_candidates(
        &self,
        guard: &LoadGuard,
        candidates: &[CandidateResolution],
        policy: &RetryPolicy,
        capabilities: &Arc<Capabilities>,
    ) -> Result<LoadSuccess> {
        let request_id = guard.request_id;
        let budget = attempt_budget(candidates, policy);

        info!(
            request_id,
            candidates = candidates.len(),
            attempt_budget = budget,
            "Load started"
        );
        self.events.emit(EngineEvent::LoadStart {
            request_id,
            sources: candidates.iter().map(|c| c.source.clone()).collect(),
            attempt_budget: budget,
        });

        let mut tally = AttemptTally::default();
        let result = self
            .try_candidates(guard, candidates, policy, capabilities, &mut tally)
            .await;

        let outcome = match &result {
            Ok(success) => LoadOutcome::Loaded {
                strategy: success.strategy.clone(),
                source: success.source.clone(),
            },
            Err(err) => match err.category() {
                ErrorCategory::Aborted => LoadOutcome::Aborted,
                ErrorCategory::Superseded => LoadOutcome::Superseded,
                category => LoadOutcome::Failed {
                    category,
                    message: err.to_string(),
                },
            },
        };
        self.events.emit(EngineEvent::LoadEnd {
            request_id,
            outcome,
            attempts: tally.attempts,
        });

        result
    }

    async fn try_candidates(
        &self,
        guard: &LoadGuard,
        candidates: &[CandidateResolution],
        policy: &RetryPolicy,
        capabilities: &Arc<Capabilities>,
        tally: &mut AttemptTally,
    ) -> Result<LoadSuccess> {
        let request_id = guard.request_id;
        let mut last_error = None;

        for (index, candidate) in candidates.iter().enumerate() {
            guard.check()?;

            let error = match &candidate.factory {
                None => {
                    let err = Error::UnsupportedFormat {
                        locator: candidate.source.clone(),
                    };
                    warn!(request_id, source = %candidate.source, "No adapter can handle source");
                    tally.attempts += 1;
                    tally.record(&candidate.source, 0, &err);
                    self.dispatcher.on_source_load_failed(&SourceLoadFailed {
                        request_id,
                        source: candidate.source.clone(),
                        strategy: None,
                        attempt: 0,
                        category: err.category(),
                        message: err.to_string(),
                        will_retry: false,
                    });
                    err
                }
                Some(factory) => {
                    match self
                        .attempt_candidate(guard, candidate, factory, policy, capabilities, tally)
                        .await
                    {
                        Ok(success) => return Ok(success),
                        Err(err) if err.category().is_control() => return Err(err),
                        Err(err) => err,
                    }
                }
            };

            if let Some(next) = candidates.get(index + 1) {
                warn!(
                    request_id,
                    from = %candidate.source,
                    to = %next.source,
                    error = %error,
                    "Failing over to next source"
                );
                self.dispatcher.on_failover(&Failover {
                    request_id,
                    from_src: candidate.source.clone(),
                    to_src: next.source.clone(),
                    reason: error.to_string(),
                });
            }
            last_error = Some(error);
        }

        let last = last_error.unwrap_or_else(|| Error::Internal("no candidate sources".to_string()));
        let exhausted = Error::Exhausted {
            attempts: tally.attempts,
            sources: candidates.len(),
            last: Box::new(last),
            failures: std::mem::take(&mut tally.failures),
        };
        warn!(request_id, error = %exhausted, "All sources exhausted");
        self.dispatcher.on_error(&exhausted);
        self.events.emit(EngineEvent::Error {
            error: exhausted.clone(),
        });
        Err(exhausted)
    }

    async fn attempt_candidate(
        &self,
        guard: &LoadGuard,
        candidate: &CandidateResolution,
        factory: &Arc<dyn AdapterFactory>,
        policy: &RetryPolicy,
        capabilities: &Arc<Capabilities>,
        tally: &mut AttemptTally,
    ) -> Result<LoadSuccess> {
        let request_id = guard.request_id;
        let source = &candidate.source;
        let strategy = factory.id().to_string();
        let limit = policy.attempt_limit();
        let mut attempt = 0;

        loop {
            guard.check()?;
            tally.attempts += 1;

            debug!(request_id, source = %source, strategy = %strategy, attempt, "Attempting source");
            self.dispatcher.on_source_load_start(&SourceLoadStart {
                request_id,
                source: source.clone(),
                strategy: strategy.clone(),
                attempt,
            });

            let mut adapter = factory.create();
            let gate = Arc::new(SessionGate::default());
            let ctx = LoadContext {
                surface: self.surface.clone(),
                source: source.clone(),
                kind: SourceKind::detect(source),
                capabilities: capabilities.clone(),
                cancel: guard.token.child_token(),
                on_quality_change: self.quality_callback(request_id, gate.clone()),
            };

            let loaded = guard
                .run(adapter.load(ctx))
                .await
                .and_then(|()| guard.check());
            let err = match loaded {
                Ok(()) => {
                    let session = ActiveSession {
                        adapter,
                        strategy,
                        source: source.clone(),
                        request_id,
                        gate,
                    };
                    return self.install(guard, session, attempt, tally.attempts).await;
                }
                Err(err) => err,
            };
            gate.retire();
            adapter.destroy();

            if err.category().is_control() {
                debug!(request_id, source = %source, error = %err, "Attempt interrupted");
                return Err(err);
            }

            let category = err.category();
            let will_retry = attempt + 1 < limit && policy.is_retryable(category);
            tally.record(source, attempt, &err);
            self.dispatcher.on_source_load_failed(&SourceLoadFailed {
                request_id,
                source: source.clone(),
                strategy: Some(strategy.clone()),
                attempt,
                category,
                message: err.to_string(),
                will_retry,
            });

            if !will_retry {
                warn!(request_id, source = %source, attempt, category = %category, error = %err, "Source failed");
                return Err(err);
            }

            let delay = policy.delay_for_attempt(attempt, &mut *self.rng.lock());
            attempt += 1;
            let delay_ms = delay.as_millis() as u64;

            warn!(request_id, source = %source, attempt, delay_ms, category = %category, "Retrying source");
            self.dispatcher.on_retry(&RetryState {
                request_id,
                source: source.clone(),
                attempt,
                delay_ms,
                category,
            });

            guard.sleep(delay).await?;
        }
    }

    async fn install(
        &self,
        guard: &LoadGuard,
        mut session: ActiveSession,
        attempt: u32,
        attempts: u32,
    ) -> Result<LoadSuccess> {
        let request_id = guard.request_id;
        let mut active = self.active.lock().await;
        if let Err(err) = guard.check() {
            drop(active);
            session.destroy();
            return Err(err);
        }

        if let Some(mut previous) = active.take() {
            debug!(previous = previous.request_id, source = %previous.source, "Destroying previous session");
            previous.destroy();
        }
        session.gate.install();
        let strategy = session.strategy.clone();
        let source = session.source.clone();
        *active = Some(session);
        self.session_generation.fetch_add(1, Ordering::SeqCst);
        drop(active);

        info!(request_id, source = %source, strategy = %strategy, attempts, "Source loaded");
        self.dispatcher.on_source_loaded(&SourceLoaded {
            request_id,
            source: source.clone(),
            strategy: strategy.clone(),
            attempt,
        });

        Ok(LoadSuccess {
            request_id,
            strategy,
            source,
            attempts,
        })
    }

    /// Quality notifications from stale attempts and retired sessions are dropped
    fn quality_callback(&self, request_id: RequestId, gate: Arc<SessionGate>) -> QualityCallback {
        let epoch = self.epoch.clone();
        let events = self.events.clone();
        let dispatcher = self.dispatcher.clone();

        Arc::new(move |level: QualityLevel| {
            if !gate.is_open(&epoch, request_id) {
                return;
            }
            dispatcher.on_quality_change(&level);
            events.emit(EngineEvent::QualityChange { level });
        })
    }

    async fn teardown_sessions(&self) {
        let previous = self.active.lock().await.take();
        if let Some(mut session) = previous {
            debug!(request_id = session.request_id, source = %session.source, "Tearing down active session");
            session.destroy();
        }

        let protection = self.protection.lock().await.take();
        if let Some(mut protection) = protection {
            debug!(session = %protection.id(), "Tearing down protection session");
            protection.teardown();
        }
    }

    /// Quality levels of the active adapter; empty without a session
    pub async fn quality_levels(&self) -> Result<Vec<QualityLevel>> {
        self.ensure_live()?;
        Ok(self
            .active
            .lock()
            .await
            .as_ref()
            .map(|session| session.adapter.quality_levels())
            .unwrap_or_default())
    }

    /// Select a quality level on the active adapter; no-op without a session
    pub async fn set_quality(&self, id: &str) -> Result<()> {
        self.ensure_live()?;
        match self.active.lock().await.as_mut() {
            Some(session) => session.adapter.set_quality(id),
            None => Ok(()),
        }
    }

    pub async fn current_strategy(&self) -> Result<Option<String>> {
        self.ensure_live()?;
        Ok(self
            .active
            .lock()
            .await
            .as_ref()
            .map(|session| session.strategy.clone()))
    }

    pub async fn current_source(&self) -> Result<Option<String>> {
        self.ensure_live()?;
        Ok(self
            .active
            .lock()
            .await
            .as_ref()
            .map(|session| session.source.clone()))
    }

    /// Capabilities, if already resolved
    pub fn capabilities(&self) -> Result<Option<Arc<Capabilities>>> {
        self.ensure_live()?;
        Ok(self.capabilities.get().cloned())
    }

    pub async fn protection_state(&self) -> Result<Option<LicenseState>> {
        self.ensure_live()?;
        Ok(self.protection.lock().await.as_ref().map(|p| p.state()))
    }

    pub async fn protection_key_system(&self) -> Result<Option<KeySystem>> {
        self.ensure_live()?;
        Ok(self
            .protection
            .lock()
            .await
            .as_ref()
            .map(|p| p.key_system().clone()))
    }

    /// Tear down both sessions and supersede any in-flight load
    #[instrument(skip(self), fields(engine = %self.id))]
    pub async fn cleanup(&self) -> Result<()> {
        self.ensure_live()?;
        self.supersede();
        self.teardown_sessions().await;
        info!("Engine cleaned up");
        Ok(())
    }

    /// Release everything. Idempotent; every other method fails with
    /// [`Error::Disposed`] afterwards.
    #[instrument(skip(self), fields(engine = %self.id))]
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.supersede();
        self.lifetime.cancel();
        if let Some(observer) = self.observer.lock().take() {
            observer.abort();
        }
        self.teardown_sessions().await;
        self.dispatcher.on_dispose();
        info!("Engine disposed");
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
