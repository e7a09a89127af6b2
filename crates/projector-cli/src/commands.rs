//! Command implementations

use crate::output::{format_json, format_table, OutputFormat};
use crate::scenario::{Scenario, ScriptedAdapterFactory, ScriptedEvent};
use anyhow::Result;
use parking_lot::Mutex;
use projector_core::plugin::{Failover, RetryState, SourceLoadFailed, SourceLoadStart, SourceLoaded};
use projector_core::{
    calculate_delay, classify_message, Capabilities, EngineConfig, EngineEvent, Error,
    FailureRecord, HookResult, LoadSuccess, MemorySurface, PlaybackEngine, PlaybackRequest,
    Plugin, QualityLevel, RetryPolicy, StaticCapabilityProbe,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long to wait for the event recorder once the engine is gone
const RECORDER_DRAIN: Duration = Duration::from_secs(1);

// ============================================================================
// Simulate
// ============================================================================

#[derive(Debug, Clone, Serialize, Tabled)]
struct TimelineEntry {
    #[tabled(rename = "t (ms)")]
    at_ms: u64,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Ordered record of hooks and events, optionally echoed as it happens
struct Timeline {
    started: Instant,
    live: bool,
    entries: Mutex<Vec<TimelineEntry>>,
}

impl Timeline {
    fn new(live: bool) -> Self {
        Self {
            started: Instant::now(),
            live,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, kind: &str, detail: String) {
        let at_ms = self.started.elapsed().as_millis() as u64;
        if self.live {
            println!("[{at_ms:>6}ms] {kind:<22} {detail}");
        }
        self.entries.lock().push(TimelineEntry {
            at_ms,
            kind: kind.to_string(),
            detail,
        });
    }

    fn entries(&self) -> Vec<TimelineEntry> {
        self.entries.lock().clone()
    }
}

/// Writes every plugin hook to the timeline
struct TimelinePlugin {
    timeline: Arc<Timeline>,
}

impl Plugin for TimelinePlugin {
    fn name(&self) -> &str {
        "timeline"
    }

    fn on_init(&self, capabilities: &Capabilities) -> HookResult {
        self.timeline.record(
            "hook:init",
            format!("protocols={:?} device={:?}", capabilities.protocols, capabilities.device),
        );
        Ok(())
    }

    fn on_source_load_start(&self, event: &SourceLoadStart) -> HookResult {
        self.timeline.record(
            "hook:load_start",
            format!(
                "#{} {} via {} (attempt {})",
                event.request_id, event.source, event.strategy, event.attempt
            ),
        );
        Ok(())
    }

    fn on_source_loaded(&self, event: &SourceLoaded) -> HookResult {
        self.timeline.record(
            "hook:loaded",
            format!(
                "#{} {} via {} (attempt {})",
                event.request_id, event.source, event.strategy, event.attempt
            ),
        );
        Ok(())
    }

    fn on_source_load_failed(&self, event: &SourceLoadFailed) -> HookResult {
        self.timeline.record(
            "hook:load_failed",
            format!(
                "#{} {} attempt {} [{}] {}{}",
                event.request_id,
                event.source,
                event.attempt,
                event.category.as_str(),
                event.message,
                if event.will_retry { " (will retry)" } else { "" }
            ),
        );
        Ok(())
    }

    fn on_retry(&self, event: &RetryState) -> HookResult {
        self.timeline.record(
            "hook:retry",
            format!(
                "#{} {} attempt {} in {}ms",
                event.request_id, event.source, event.attempt, event.delay_ms
            ),
        );
        Ok(())
    }

    fn on_failover(&self, event: &Failover) -> HookResult {
        self.timeline.record(
            "hook:failover",
            format!("#{} {} -> {} ({})", event.request_id, event.from_src, event.to_src, event.reason),
        );
        Ok(())
    }

    fn on_play(&self) -> HookResult {
        self.timeline.record("hook:play", String::new());
        Ok(())
    }

    fn on_pause(&self) -> HookResult {
        self.timeline.record("hook:pause", String::new());
        Ok(())
    }

    fn on_time_update(&self, current: f64, duration: f64) -> HookResult {
        self.timeline
            .record("hook:time_update", format!("{current:.2}/{duration:.2}"));
        Ok(())
    }

    fn on_volume_change(&self, volume: f64, muted: bool) -> HookResult {
        self.timeline
            .record("hook:volume_change", format!("volume={volume:.2} muted={muted}"));
        Ok(())
    }

    fn on_quality_change(&self, level: &QualityLevel) -> HookResult {
        self.timeline.record("hook:quality_change", level.label.clone());
        Ok(())
    }

    fn on_error(&self, error: &Error) -> HookResult {
        self.timeline.record("hook:error", error.to_string());
        Ok(())
    }

    fn on_dispose(&self) -> HookResult {
        self.timeline.record("hook:dispose", String::new());
        Ok(())
    }
}

fn describe_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::Ready { capabilities } => format!("protocols={:?}", capabilities.protocols),
        EngineEvent::Play | EngineEvent::Pause => String::new(),
        EngineEvent::TimeUpdate { current, duration } => format!("{current:.2}/{duration:.2}"),
        EngineEvent::Progress { buffered_percent } => format!("{buffered_percent:.1}% buffered"),
        EngineEvent::VolumeChange { volume, muted } => format!("volume={volume:.2} muted={muted}"),
        EngineEvent::QualityChange { level } => level.label.clone(),
        EngineEvent::Error { error } => format!("[{}] {error}", error.error_code()),
        EngineEvent::LoadStart {
            request_id,
            sources,
            attempt_budget,
        } => format!(
            "#{request_id} {} source(s), budget {attempt_budget}",
            sources.len()
        ),
        EngineEvent::LoadEnd {
            request_id,
            outcome,
            attempts,
        } => format!(
            "#{request_id} {} after {attempts} attempt(s)",
            serde_json::to_string(outcome).unwrap_or_default()
        ),
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct RequestRow {
    #[tabled(rename = "Request")]
    request: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Strategy")]
    strategy: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl RequestRow {
    fn new(label: &str, result: &projector_core::Result<LoadSuccess>) -> Self {
        match result {
            Ok(success) => Self {
                request: format!("{label} #{}", success.request_id),
                outcome: "loaded".to_string(),
                source: success.source.clone(),
                strategy: success.strategy.clone(),
                attempts: success.attempts,
                detail: String::new(),
            },
            Err(error) => {
                let attempts = match error {
                    Error::Exhausted { attempts, .. } => *attempts,
                    _ => 0,
                };
                Self {
                    request: label.to_string(),
                    outcome: error.category().as_str().to_string(),
                    source: "-".to_string(),
                    strategy: "-".to_string(),
                    attempts,
                    detail: error.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct FailureRow {
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Attempt")]
    attempt: u32,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&FailureRecord> for FailureRow {
    fn from(record: &FailureRecord) -> Self {
        Self {
            source: record.source.clone(),
            attempt: record.attempt,
            category: record.category.as_str().to_string(),
            message: record.message.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    scenario: String,
    requests: Vec<RequestRow>,
    failures: Vec<FailureRecord>,
    active_strategy: Option<String>,
    quality_levels: Vec<QualityLevel>,
    timeline: Vec<TimelineEntry>,
}

fn build_request(
    sources: &[String],
    scenario: &Scenario,
    cancel: Option<CancellationToken>,
) -> Result<PlaybackRequest> {
    let (primary, fallbacks) = sources
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Request has no sources"))?;

    let mut builder = PlaybackRequest::builder(primary.clone()).fallbacks(fallbacks.iter().cloned());
    if let Some(policy) = &scenario.retry_policy {
        builder = builder.retry_policy(policy.clone());
    }
    if let Some(surface) = &scenario.surface {
        builder = builder.surface_config(surface.clone());
    }
    if let Some(token) = cancel {
        builder = builder.cancel_token(token);
    }
    Ok(builder.build()?)
}

/// Run a scenario file against a memory surface
pub async fn simulate(
    path: &Path,
    config_path: Option<&Path>,
    seed: Option<u64>,
    format: &str,
) -> Result<()> {
    let format = OutputFormat::from(format);
    let scenario = Scenario::from_file(path)?;
    let config = match config_path {
        Some(config_path) => EngineConfig::from_json_file(config_path)?,
        None => EngineConfig::default(),
    };
    let settle = config.frame_interval() * 4;

    let timeline = Arc::new(Timeline::new(!format.is_json()));
    let surface = Arc::new(MemorySurface::new());
    let probe = Arc::new(StaticCapabilityProbe::new(scenario.capabilities.clone()));

    let mut builder = PlaybackEngine::builder(surface.clone(), probe)
        .config(config)
        .adapter(Arc::new(ScriptedAdapterFactory::new(&scenario.scripts)))
        .plugin(Arc::new(TimelinePlugin {
            timeline: timeline.clone(),
        }));
    if let Some(seed) = seed {
        builder = builder.rng_seed(seed);
    }
    let engine = Arc::new(builder.build()?);

    info!(engine = %engine.id(), scenario = %path.display(), "Running scenario");

    let mut events = engine.subscribe()?;
    let recorder = {
        let timeline = timeline.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => timeline.record(event.name(), describe_event(&event)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event recorder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let cancel = CancellationToken::new();
    let primary = build_request(&scenario.sources, &scenario, Some(cancel.clone()))?;

    if let Some(ms) = scenario.abort_after_ms {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            cancel.cancel();
        });
    }

    let superseding = match &scenario.supersede {
        Some(step) => {
            let request = build_request(&step.sources, &scenario, None)?;
            let engine = engine.clone();
            let delay = Duration::from_millis(step.after_ms);
            Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine.load_source(request).await
            }))
        }
        None => None,
    };

    let mut results = vec![("primary", engine.load_source(primary).await)];
    if let Some(handle) = superseding {
        results.push(("superseding", handle.await?));
    }

    if results.iter().any(|(_, result)| result.is_ok()) {
        for step in &scenario.playback {
            if let ScriptedEvent::Wait { ms } = step {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            } else if let Some(event) = step.to_surface_event() {
                surface.emit(event);
            }
        }
        tokio::time::sleep(settle).await;
    }

    let active_strategy = engine.current_strategy().await?;
    let quality_levels = engine.quality_levels().await?;

    engine.dispose().await;
    drop(engine);
    if tokio::time::timeout(RECORDER_DRAIN, recorder).await.is_err() {
        warn!("Event recorder did not drain");
    }

    let requests: Vec<RequestRow> = results
        .iter()
        .map(|(label, result)| RequestRow::new(label, result))
        .collect();
    let failures: Vec<FailureRecord> = results
        .iter()
        .filter_map(|(_, result)| match result {
            Err(Error::Exhausted { failures, .. }) => Some(failures.clone()),
            _ => None,
        })
        .flatten()
        .collect();

    if format.is_json() {
        let report = SimulationReport {
            scenario: path.display().to_string(),
            requests,
            failures,
            active_strategy,
            quality_levels,
            timeline: timeline.entries(),
        };
        println!("{}", format_json(&report)?);
        return Ok(());
    }

    println!();
    println!("{}", format_table(requests));
    if !failures.is_empty() {
        println!();
        println!("Failed attempts:");
        println!("{}", format_table(failures.iter().map(FailureRow::from)));
    }
    if let Some(strategy) = active_strategy {
        println!();
        println!("Active strategy: {strategy}");
        let labels: Vec<&str> = quality_levels.iter().map(|l| l.label.as_str()).collect();
        println!("Quality levels:  {}", labels.join(", "));
    }

    Ok(())
}

// ============================================================================
// Backoff
// ============================================================================

#[derive(Debug, Clone, Serialize, Tabled)]
struct DelayRow {
    #[tabled(rename = "Retry")]
    retry: u32,
    #[tabled(rename = "Nominal (ms)")]
    nominal_ms: u64,
    #[tabled(rename = "Delay (ms)")]
    delay_ms: u64,
    #[tabled(rename = "Elapsed (ms)")]
    elapsed_ms: u64,
}

/// Print the delay before each retry a policy allows
pub fn backoff(
    base: u64,
    max: u64,
    multiplier: f64,
    jitter: f64,
    attempts: u32,
    seed: Option<u64>,
    format: &str,
) -> Result<()> {
    let requested = RetryPolicy::default()
        .with_max_retries(attempts)
        .with_delays(base, max)
        .with_multiplier(multiplier)
        .with_jitter(jitter);
    let policy = requested.clone().normalized();
    if policy != requested {
        warn!(?policy, "Policy clamped into supported ranges");
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut elapsed_ms = 0u64;
    let rows: Vec<DelayRow> = (0..policy.max_retries)
        .map(|attempt| {
            let nominal_ms = calculate_delay(
                attempt,
                policy.base_delay_ms,
                policy.max_delay_ms,
                policy.backoff_multiplier,
                0.0,
                &mut rng,
            );
            let delay_ms = policy.delay_for_attempt(attempt, &mut rng).as_millis() as u64;
            elapsed_ms += delay_ms;
            DelayRow {
                retry: attempt + 1,
                nominal_ms,
                delay_ms,
                elapsed_ms,
            }
        })
        .collect();

    if OutputFormat::from(format).is_json() {
        #[derive(Serialize)]
        struct BackoffReport<'a> {
            policy: &'a RetryPolicy,
            schedule: &'a [DelayRow],
        }
        println!(
            "{}",
            format_json(&BackoffReport {
                policy: &policy,
                schedule: &rows,
            })?
        );
        return Ok(());
    }

    println!(
        "Backoff: base {}ms, max {}ms, x{}, jitter ±{:.0}%, {} retries",
        policy.base_delay_ms,
        policy.max_delay_ms,
        policy.backoff_multiplier,
        policy.jitter_ratio * 100.0,
        policy.max_retries
    );
    if rows.is_empty() {
        println!("No retries: the first failure moves to the next source.");
    } else {
        println!("{}", format_table(rows));
    }

    Ok(())
}

// ============================================================================
// Classify
// ============================================================================

#[derive(Debug, Clone, Serialize, Tabled)]
struct ClassificationRow {
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Retried by default")]
    retried: bool,
}

/// Show how failure messages map onto retry categories
pub fn classify(messages: &[String], format: &str) -> Result<()> {
    let policy = RetryPolicy::default();
    let rows: Vec<ClassificationRow> = messages
        .iter()
        .map(|message| {
            let category = classify_message(message);
            ClassificationRow {
                message: message.clone(),
                category: category.as_str().to_string(),
                retried: policy.is_retryable(category),
            }
        })
        .collect();

    if OutputFormat::from(format).is_json() {
        println!("{}", format_json(&rows)?);
    } else {
        println!("{}", format_table(rows));
    }

    Ok(())
}
