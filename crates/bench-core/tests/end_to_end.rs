use std::sync::Arc;
use std::time::Duration;

use bench_core::{
    runner, BenchmarkConfig, Config, MockBehavior, MockConnector, Review, ReviewSource,
    TargetConfig, WorkloadConfig, INVALID_BOOK_ID,
};

fn config() -> Config {
    Config {
        benchmark: BenchmarkConfig {
            warmup_secs: 0,
            duration_secs: 2,
            display_interval_secs: 1,
            workers: 2,
            latency_report: true,
            results_file: None,
        },
        target: TargetConfig {
            endpoints: vec!["localhost:8080".to_string()],
            timeout_ms: 10_000,
        },
        workload: WorkloadConfig {
            books: 6,
            max_reviews: 25,
            seed: Some(42),
        },
    }
}

fn connector(behavior: MockBehavior) -> Arc<MockConnector> {
    Arc::new(MockConnector::new(behavior, Duration::from_millis(1)))
}

/// Emits the out-of-domain sentinel on every call.
struct SentinelSource;

impl ReviewSource for SentinelSource {
    fn next_review(&mut self) -> Review {
        Review {
            book_id: INVALID_BOOK_ID,
            email: "SENTINEL@TEST.XYZ".to_string(),
            review: "X".repeat(100),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn accepting_service_counts_everything_as_accepted() {
    let report = runner::run(&config(), connector(MockBehavior::AlwaysAccept))
        .await
        .unwrap();

    assert!(report.totals.accepted > 0);
    assert_eq!(report.totals.rejected_invalid_book, 0);
    assert_eq!(report.totals.rejected_over_limit, 0);
    assert_eq!(report.totals.failed, 0);
    assert_eq!(report.totals.total(), report.totals.accepted);
    assert_eq!(report.stats.invocations, report.totals.total());
}

#[tokio::test(start_paused = true)]
async fn sentinel_only_workload_is_rejected_as_invalid() {
    let report = runner::run_with_sources(
        &config(),
        connector(MockBehavior::Faithful),
        |_stream| Box::new(SentinelSource),
    )
    .await
    .unwrap();

    assert!(report.totals.rejected_invalid_book > 0);
    assert_eq!(report.totals.total(), report.totals.rejected_invalid_book);
    assert_eq!(report.totals.accepted, 0);
    assert_eq!(report.totals.failed, 0);
    assert_eq!(report.stats.invocations, report.totals.total());

    // The book table was initialized even though nothing was accepted.
    assert_eq!(report.standings.len(), 6);
    assert!(report.standings.iter().all(|s| s.reviews == 0));
}

#[tokio::test(start_paused = true)]
async fn failing_transport_counts_everything_as_failed() {
    let report = runner::run(&config(), connector(MockBehavior::FailTransport))
        .await
        .unwrap();

    assert!(report.totals.failed > 0);
    assert_eq!(report.totals.accepted, 0);
    assert_eq!(report.totals.total(), report.totals.failed);
    assert_eq!(report.stats.invocations, report.totals.total());
}

#[tokio::test(start_paused = true)]
async fn mixed_workload_preserves_the_counter_invariant() {
    let mut cfg = config();
    cfg.benchmark.warmup_secs = 1;
    cfg.benchmark.workers = 4;

    let report = runner::run(&cfg, connector(MockBehavior::Faithful))
        .await
        .unwrap();

    // The seeded workload injects ~1% invalid books; everything must land
    // in exactly one counter.
    assert!(report.totals.accepted > 0);
    assert_eq!(report.stats.invocations, report.totals.total());
    assert_eq!(
        report.totals.total(),
        report.totals.accepted
            + report.totals.rejected_invalid_book
            + report.totals.rejected_over_limit
            + report.totals.failed
    );

    // Warmup submissions reach the service even though they are not
    // counted, so the service-side tally is at least the measured one.
    let reviewed: u64 = report.standings.iter().map(|s| s.reviews).sum();
    assert!(reviewed >= report.totals.accepted);
}

#[tokio::test]
async fn invalid_configuration_fails_before_connecting() {
    let mut cfg = config();
    cfg.benchmark.duration_secs = 0;

    let err = runner::run(&cfg, connector(MockBehavior::AlwaysAccept))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid configuration"));
}
