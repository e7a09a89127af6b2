//! DRM - content protection negotiation for one playback surface
//!
//! Supports any EME-style key system; the well known ones are named:
//! - Widevine (Chrome, Android, Chromecast)
//! - PlayReady (Edge, Windows)
//! - FairPlay (Safari, iOS, tvOS)
//! - ClearKey (open standard, licenses can be built locally)
//!
//! # License state machine
//!
//! ```text
//!  Disabled ──► RequestingAccess ──► AccessGranted ──► AwaitingChallenge
//!                                                            │
//!                                        ┌───────────────────┘
//!                                        ▼
//!                               ExchangingLicense ◄──► Ready
//!
//!  any non-terminal state ──► Failed
//! ```

use crate::error::{Error, Result};
use crate::surface::{PlaybackSurface, SurfaceEvent};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// License exchanges taking longer than this are abandoned
pub const DEFAULT_LICENSE_TIMEOUT_MS: u64 = 15_000;

/// Content protection key system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeySystem {
    Widevine,
    PlayReady,
    FairPlay,
    ClearKey,
    Other(String),
}

impl KeySystem {
    /// EME key system string
    pub fn as_str(&self) -> &str {
        match self {
            KeySystem::Widevine => "com.widevine.alpha",
            KeySystem::PlayReady => "com.microsoft.playready",
            KeySystem::FairPlay => "com.apple.fps",
            KeySystem::ClearKey => "org.w3.clearkey",
            KeySystem::Other(name) => name,
        }
    }

    /// Returns the system ID (UUID) used in PSSH boxes
    pub fn system_id(&self) -> Option<&'static str> {
        match self {
            KeySystem::Widevine => Some("edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"),
            KeySystem::PlayReady => Some("9a04f079-9840-4286-ab92-e65be0885f95"),
            KeySystem::FairPlay => Some("94ce86fb-07ff-4f43-adb8-93d2fa968ca2"),
            KeySystem::ClearKey => Some("1077efec-c0b2-4d02-ace3-3c1e52e2fb4b"),
            KeySystem::Other(_) => None,
        }
    }
}

impl From<&str> for KeySystem {
    fn from(name: &str) -> Self {
        let lower = name.trim().to_lowercase();
        match lower.as_str() {
            "widevine" | "com.widevine.alpha" => KeySystem::Widevine,
            "clearkey" | "org.w3.clearkey" => KeySystem::ClearKey,
            "playready" => KeySystem::PlayReady,
            "fairplay" => KeySystem::FairPlay,
            s if s.starts_with("com.microsoft.playready") => KeySystem::PlayReady,
            s if s.starts_with("com.apple.fps") => KeySystem::FairPlay,
            _ => KeySystem::Other(name.trim().to_string()),
        }
    }
}

impl From<String> for KeySystem {
    fn from(name: String) -> Self {
        KeySystem::from(name.as_str())
    }
}

impl From<KeySystem> for String {
    fn from(system: KeySystem) -> Self {
        system.as_str().to_string()
    }
}

impl std::fmt::Display for KeySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key system candidate with its license endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeySystemOption {
    pub key_system: KeySystem,
    #[serde(default)]
    pub license_url: Option<Url>,
}

impl KeySystemOption {
    pub fn new(key_system: KeySystem, license_url: Option<Url>) -> Self {
        Self {
            key_system,
            license_url,
        }
    }
}

/// DRM configuration for a playback request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub enabled: bool,
    /// Candidates in preference order; the first one granted wins
    pub key_systems: Vec<KeySystemOption>,
    /// Custom headers for license requests
    pub license_headers: HashMap<String, String>,
    /// Overrides the engine's license timeout
    pub license_timeout_ms: Option<u64>,
    /// ClearKey keys (key_id -> key, base64). Answered locally when set.
    pub clearkey_keys: BTreeMap<String, String>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_systems: Vec::new(),
            license_headers: HashMap::new(),
            license_timeout_ms: None,
            clearkey_keys: BTreeMap::new(),
        }
    }
}

impl ProtectionConfig {
    /// Create a Widevine-only configuration
    pub fn widevine(license_url: Url) -> Self {
        Self::default().with_key_system(KeySystem::Widevine, Some(license_url))
    }

    /// Create a PlayReady-only configuration
    pub fn playready(license_url: Url) -> Self {
        Self::default().with_key_system(KeySystem::PlayReady, Some(license_url))
    }

    /// Create a ClearKey configuration answered from local keys
    pub fn clearkey(keys: BTreeMap<String, String>) -> Self {
        Self {
            clearkey_keys: keys,
            ..Self::default().with_key_system(KeySystem::ClearKey, None)
        }
    }

    /// Append a key system candidate
    pub fn with_key_system(mut self, key_system: KeySystem, license_url: Option<Url>) -> Self {
        self.key_systems
            .push(KeySystemOption::new(key_system, license_url));
        self
    }

    /// Add a custom header for license requests
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.license_headers
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.license_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Enabled with at least one key system candidate
    pub fn is_active(&self) -> bool {
        self.enabled && !self.key_systems.is_empty()
    }
}

/// License negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseState {
    Disabled,
    RequestingAccess,
    AccessGranted,
    AwaitingChallenge,
    ExchangingLicense,
    Ready,
    Failed,
}

impl LicenseState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: LicenseState) -> bool {
        use LicenseState::*;
        match (self, target) {
            (Failed, _) => false,
            (_, Failed) => true,
            (Disabled, RequestingAccess) => true,
            (RequestingAccess, AccessGranted) => true,
            (AccessGranted, AwaitingChallenge) => true,
            (AwaitingChallenge, ExchangingLicense) => true,
            (ExchangingLicense, Ready) => true,
            // Sessions are reused for later challenges
            (Ready, ExchangingLicense) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LicenseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LicenseState::Disabled => "disabled",
            LicenseState::RequestingAccess => "requesting_access",
            LicenseState::AccessGranted => "access_granted",
            LicenseState::AwaitingChallenge => "awaiting_challenge",
            LicenseState::ExchangingLicense => "exchanging_license",
            LicenseState::Ready => "ready",
            LicenseState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Environment-level key system access (`requestMediaKeySystemAccess`)
#[async_trait]
pub trait KeySystemAccess: Send + Sync {
    /// Grant access to a key system or fail
    async fn request_access(&self, key_system: &KeySystem) -> Result<Arc<dyn MediaKeys>>;
}

/// Keys for one key system, attachable to a surface
pub trait MediaKeys: Send + Sync {
    fn key_system(&self) -> &KeySystem;

    fn create_session(&self) -> Result<Arc<dyn KeySession>>;
}

/// Platform key session
#[async_trait]
pub trait KeySession: Send + Sync {
    fn session_id(&self) -> String;

    /// Turn encrypted init data into a license challenge
    async fn generate_request(&self, init_data_type: &str, init_data: &[u8]) -> Result<Bytes>;

    /// Apply a license response
    async fn update(&self, license: &[u8]) -> Result<()>;

    fn close(&self);
}

/// License request for a DRM system
#[derive(Debug, Clone)]
pub struct LicenseRequest {
    pub key_system: KeySystem,
    /// Request body (challenge)
    pub challenge: Bytes,
    /// License server URL
    pub endpoint: Url,
    /// Request headers
    pub headers: HashMap<String, String>,
}

/// Exchanges a challenge for license bytes
#[async_trait]
pub trait LicenseRequestor: Send + Sync {
    async fn request_license(&self, request: LicenseRequest, cancel: CancellationToken)
        -> Result<Bytes>;
}

/// Default POST-style license exchange
#[derive(Debug, Clone, Default)]
pub struct HttpLicenseRequestor {
    client: reqwest::Client,
}

impl HttpLicenseRequestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LicenseRequestor for HttpLicenseRequestor {
    async fn request_license(
        &self,
        request: LicenseRequest,
        cancel: CancellationToken,
    ) -> Result<Bytes> {
        let mut builder = self
            .client
            .post(request.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(request.challenge);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::LicenseHttp {
                    status: status.as_u16(),
                });
            }
            Ok(response.bytes().await?)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Aborted),
            result = exchange => result,
        }
    }
}

/// Receives failures from background challenge handling
pub type ProtectionErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// Negotiates protection for a single surface
pub struct LicenseController {
    config: ProtectionConfig,
    surface: Arc<dyn PlaybackSurface>,
    access: Arc<dyn KeySystemAccess>,
    requestor: Arc<dyn LicenseRequestor>,
    timeout: Duration,
    state: watch::Sender<LicenseState>,
    selected: Mutex<Option<KeySystemOption>>,
    keys: Mutex<Option<Arc<dyn MediaKeys>>>,
    session: Mutex<Option<Arc<dyn KeySession>>>,
    attached: AtomicBool,
    torn_down: AtomicBool,
    cancel: CancellationToken,
}

impl LicenseController {
    pub fn new(
        config: ProtectionConfig,
        surface: Arc<dyn PlaybackSurface>,
        access: Arc<dyn KeySystemAccess>,
        requestor: Arc<dyn LicenseRequestor>,
    ) -> Self {
        let timeout = Duration::from_millis(
            config
                .license_timeout_ms
                .unwrap_or(DEFAULT_LICENSE_TIMEOUT_MS),
        );
        let (state, _) = watch::channel(LicenseState::Disabled);

        Self {
            config,
            surface,
            access,
            requestor,
            timeout,
            state,
            selected: Mutex::new(None),
            keys: Mutex::new(None),
            session: Mutex::new(None),
            attached: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Timeout used when the configuration does not set one
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        if self.config.license_timeout_ms.is_none() {
            self.timeout = timeout;
        }
        self
    }

    /// Abort signal for every operation of this controller
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> LicenseState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LicenseState> {
        self.state.subscribe()
    }

    /// Negotiated key system, once access was granted
    pub fn key_system(&self) -> Option<KeySystem> {
        self.selected
            .lock()
            .as_ref()
            .map(|option| option.key_system.clone())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn transition(&self, next: LicenseState) -> Result<()> {
        let current = self.state();
        if !current.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.state.send_replace(next);
        debug!(from = %current, to = %next, "License state transition");
        Ok(())
    }

    /// Enter `Failed`, release everything, hand the error back
    fn fail(&self, err: Error) -> Error {
        self.state.send_replace(LicenseState::Failed);
        warn!(error = %err, "Content protection failed");
        self.teardown();
        err
    }

    /// Request key system access, attach keys and open a key session.
    /// Returns once the controller is awaiting challenges.
    pub async fn establish(&self) -> Result<()> {
        if !self.config.is_active() {
            return Err(Error::InvalidRequest(
                "protection requested without an enabled key system".to_string(),
            ));
        }
        self.transition(LicenseState::RequestingAccess)?;

        let mut granted = None;
        for option in &self.config.key_systems {
            let attempt = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.fail(Error::Aborted)),
                attempt = self.access.request_access(&option.key_system) => attempt,
            };
            match attempt {
                Ok(keys) => {
                    granted = Some((option.clone(), keys));
                    break;
                }
                Err(err) => {
                    debug!(key_system = %option.key_system, error = %err, "Key system access denied");
                }
            }
        }

        let Some((option, keys)) = granted else {
            let candidates = self
                .config
                .key_systems
                .iter()
                .map(|o| o.key_system.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(self.fail(Error::NoSupportedKeySystem { candidates }));
        };

        self.transition(LicenseState::AccessGranted)?;
        info!(key_system = %option.key_system, "Key system access granted");
        *self.selected.lock() = Some(option);
        *self.keys.lock() = Some(keys.clone());

        if let Err(err) = self.surface.attach_media_keys(Some(keys.clone())) {
            return Err(self.fail(err));
        }
        self.attached.store(true, Ordering::SeqCst);

        let session = match keys.create_session() {
            Ok(session) => session,
            Err(err) => return Err(self.fail(err)),
        };
        debug!(session_id = %session.session_id(), "Key session created");
        *self.session.lock() = Some(session);

        if self.is_torn_down() {
            // torn down while attaching; nothing may stay behind
            let orphan = self.session.lock().take();
            if let Some(session) = orphan {
                session.close();
            }
            return Err(Error::Aborted);
        }

        self.transition(LicenseState::AwaitingChallenge)
    }

    /// Answer one encrypted-content challenge
    pub async fn handle_challenge(&self, init_data_type: &str, init_data: &[u8]) -> Result<()> {
        if self.is_torn_down() {
            return Err(Error::Aborted);
        }
        let session = self
            .session
            .lock()
            .clone()
            .ok_or_else(|| Error::drm("no key session established"))?;
        let option = self
            .selected
            .lock()
            .clone()
            .ok_or_else(|| Error::drm("no key system negotiated"))?;

        self.transition(LicenseState::ExchangingLicense)?;

        if init_data.is_empty() {
            return Err(self.fail(Error::MalformedChallenge(format!(
                "empty {init_data_type} init data"
            ))));
        }

        let exchange = async {
            let challenge = session.generate_request(init_data_type, init_data).await?;
            if challenge.is_empty() {
                return Err(Error::MalformedChallenge(
                    "key session produced an empty challenge".to_string(),
                ));
            }
            let license = self.acquire_license(&option, challenge).await?;
            session.update(&license).await
        };

        let timeout_ms = self.timeout.as_millis() as u64;
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Aborted),
            result = tokio::time::timeout(self.timeout, exchange) => {
                result.unwrap_or_else(|_| Err(Error::LicenseTimeout { timeout_ms }))
            }
        };

        match outcome {
            Ok(()) => {
                self.transition(LicenseState::Ready)?;
                info!(key_system = %option.key_system, "License applied");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn acquire_license(&self, option: &KeySystemOption, challenge: Bytes) -> Result<Bytes> {
        if option.key_system == KeySystem::ClearKey && !self.config.clearkey_keys.is_empty() {
            return clearkey_license(&self.config.clearkey_keys);
        }

        let endpoint = option.license_url.clone().ok_or_else(|| {
            Error::drm(format!(
                "no license endpoint configured for {}",
                option.key_system
            ))
        })?;

        let request = LicenseRequest {
            key_system: option.key_system.clone(),
            challenge,
            endpoint,
            headers: self.config.license_headers.clone(),
        };
        self.requestor
            .request_license(request, self.cancel.child_token())
            .await
    }

    /// Answer challenges raised on the surface until torn down or failed
    pub fn listen(self: &Arc<Self>, on_error: ProtectionErrorSink) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut events = self.surface.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = controller.cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Ok(SurfaceEvent::Encrypted {
                        init_data_type,
                        init_data,
                    }) => {
                        if let Err(err) = controller
                            .handle_challenge(&init_data_type, &init_data)
                            .await
                        {
                            if !err.category().is_control() {
                                on_error(err);
                            }
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "License listener lagged behind surface events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("License listener stopped");
        })
    }

    /// Detach keys and close the key session. Runs once; later calls are no-ops.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let session = self.session.lock().take();
        if let Some(session) = session {
            session.close();
        }
        if self.attached.swap(false, Ordering::SeqCst) {
            if let Err(err) = self.surface.attach_media_keys(None) {
                warn!(error = %err, "Failed to detach media keys");
            }
        }
        self.keys.lock().take();
        debug!("Protection torn down");
    }
}

/// Engine-owned handle on a negotiated protection session
pub struct ProtectionSession {
    id: Uuid,
    key_system: KeySystem,
    controller: Arc<LicenseController>,
    listener: Option<JoinHandle<()>>,
}

impl ProtectionSession {
    pub fn new(
        key_system: KeySystem,
        controller: Arc<LicenseController>,
        listener: JoinHandle<()>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_system,
            controller,
            listener: Some(listener),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key_system(&self) -> &KeySystem {
        &self.key_system
    }

    pub fn state(&self) -> LicenseState {
        self.controller.state()
    }

    pub fn controller(&self) -> &Arc<LicenseController> {
        &self.controller
    }

    pub fn teardown(&mut self) {
        self.controller.teardown();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for ProtectionSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Build an EME ClearKey JWK-set license from local keys
pub fn clearkey_license(keys: &BTreeMap<String, String>) -> Result<Bytes> {
    if keys.is_empty() {
        return Err(Error::drm("No ClearKey keys configured"));
    }

    let keys = keys
        .iter()
        .map(|(kid, key)| {
            Ok(serde_json::json!({
                "kty": "oct",
                "kid": to_base64url(kid)?,
                "k": to_base64url(key)?,
            }))
        })
        .collect::<Result<Vec<_>>>()?;

    let license = serde_json::json!({
        "keys": keys,
        "type": "temporary",
    });

    Ok(Bytes::from(license.to_string()))
}

/// Re-encode any base64 flavour as unpadded base64url
fn to_base64url(value: &str) -> Result<String> {
    let value = value.trim();
    let decoded = URL_SAFE_NO_PAD
        .decode(value)
        .or_else(|_| URL_SAFE.decode(value))
        .or_else(|_| STANDARD.decode(value))
        .or_else(|_| STANDARD_NO_PAD.decode(value))
        .map_err(|_| Error::drm(format!("invalid base64 ClearKey value: {value}")))?;
    Ok(URL_SAFE_NO_PAD.encode(decoded))
}
