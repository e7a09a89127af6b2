//! Benchmark tests for projector-core operations
//!
//! Run with: cargo bench -p projector-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

use projector_core::backoff::{calculate_delay, schedule};
use projector_core::registry::{attempt_budget, Adapter, AdapterFactory, AdapterRegistry};
use projector_core::source::normalize_sources;
use projector_core::{classify_message, Capabilities, NativeAdapterFactory, RetryPolicy, SourceKind};

// ============================================================================
// Helpers
// ============================================================================

struct KindFactory {
    id: String,
    priority: i32,
    kind: SourceKind,
}

impl AdapterFactory for KindFactory {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, source: &str, capabilities: &Capabilities) -> bool {
        let kind = SourceKind::detect(source);
        kind == self.kind && capabilities.supports(kind)
    }

    fn create(&self) -> Box<dyn Adapter> {
        NativeAdapterFactory.create()
    }
}

fn create_registry(factory_count: usize) -> AdapterRegistry {
    let kinds = [SourceKind::Hls, SourceKind::Dash];
    let mut registry = AdapterRegistry::with_defaults();
    for i in 0..factory_count {
        registry.register(Arc::new(KindFactory {
            id: format!("factory-{i}"),
            priority: (i % 7) as i32,
            kind: kinds[i % kinds.len()],
        }));
    }
    registry
}

fn create_sources(count: usize) -> Vec<String> {
    let extensions = ["m3u8", "mpd", "mp4"];
    (0..count)
        .map(|i| {
            format!(
                "https://cdn{}.example.com/stream/{}.{}?token=abc",
                i % 3,
                i,
                extensions[i % extensions.len()]
            )
        })
        .collect()
}

// ============================================================================
// Backoff Benchmarks
// ============================================================================

fn bench_calculate_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff");
    let mut rng = StdRng::seed_from_u64(42);

    group.bench_function("no_jitter", |b| {
        b.iter(|| {
            calculate_delay(
                black_box(3),
                black_box(500),
                black_box(30_000),
                black_box(2.0),
                black_box(0.0),
                &mut rng,
            )
        })
    });

    group.bench_function("with_jitter", |b| {
        b.iter(|| {
            calculate_delay(
                black_box(3),
                black_box(500),
                black_box(30_000),
                black_box(2.0),
                black_box(0.2),
                &mut rng,
            )
        })
    });

    let policy = RetryPolicy::default().with_max_retries(5);
    group.bench_function("full_schedule", |b| {
        b.iter(|| schedule(black_box(&policy), &mut rng))
    });

    group.finish();
}

// ============================================================================
// Registry Benchmarks
// ============================================================================

fn bench_registry_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");
    let capabilities = Capabilities::full();
    let policy = RetryPolicy::default();

    for factory_count in [1, 8, 32] {
        let registry = create_registry(factory_count);
        let sources = create_sources(10);

        group.bench_with_input(
            BenchmarkId::new("resolve_all", factory_count),
            &factory_count,
            |b, _| {
                b.iter(|| {
                    let candidates = registry.resolve_all(black_box(&sources), &capabilities);
                    attempt_budget(&candidates, &policy)
                })
            },
        );
    }

    group.bench_function("register_32", |b| b.iter(|| create_registry(black_box(32))));

    group.finish();
}

// ============================================================================
// Source Benchmarks
// ============================================================================

fn bench_source_handling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sources");
    let urls = [
        "https://example.com/video.m3u8",
        "https://example.com/manifest.mpd",
        "https://example.com/video.mp4?token=abc#t=10",
        "relative/path/stream.m3u8",
    ];

    group.bench_function("detect_kind", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(SourceKind::detect(url));
            }
        })
    });

    let mut raw = create_sources(50);
    raw.extend(create_sources(50));
    raw.push("   ".to_string());
    group.bench_function("normalize_100", |b| {
        b.iter(|| normalize_sources(black_box(raw.iter())))
    });

    group.finish();
}

// ============================================================================
// Error Classification Benchmarks
// ============================================================================

fn bench_classify_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let messages = [
        "Request timed out after 10000ms",
        "HTTP 503 Service Unavailable",
        "codec avc1.640028 not supported",
        "Failed to fetch segment: connection reset",
        "something else entirely",
    ];

    for message in messages {
        group.bench_with_input(
            BenchmarkId::from_parameter(&message[..message.len().min(16)]),
            &message,
            |b, message| b.iter(|| classify_message(black_box(message))),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_calculate_delay,
    bench_registry_resolution,
    bench_source_handling,
    bench_classify_message,
);
criterion_main!(benches);
