use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::classify::{CallClassifier, ReviewTotals, TotalsSnapshot};
use crate::config::{Config, BOOK_NAMES_CSV};
use crate::connect::{connect_all, Connector, RetryBackoff};
use crate::generator::{ReviewGenerator, ReviewSource};
use crate::phase::{PhaseFlag, RunPhase};
use crate::report::format_progress_line;
use crate::service::BookStanding;
use crate::stats::{StatsContext, StatsRecorder, StatsSnapshot};
use crate::worker::{Worker, WorkerPool};

/// Everything the run produced, for the final report and for tests.
#[derive(Debug)]
pub struct RunReport {
    pub totals: TotalsSnapshot,
    pub stats: StatsSnapshot,
    pub standings: Vec<BookStanding>,
}

/// Emits one progress line per interval from its own task. Cancellation
/// joins the task, so no line can appear after `cancel` returns.
pub struct PeriodicReporter {
    handle: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    reports: Arc<AtomicU64>,
}

impl PeriodicReporter {
    pub fn start(
        context: StatsContext,
        recorder: Arc<StatsRecorder>,
        every: Duration,
        latency_report: bool,
    ) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let reports = Arc::new(AtomicU64::new(0));
        let emitted = reports.clone();
        let started = Instant::now();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let window = context.fetch_and_reset();
                        let line = format_progress_line(
                            started.elapsed(),
                            &window,
                            recorder.rejections(),
                            recorder.failures(),
                            latency_report,
                        );
                        info!("{line}");
                        emitted.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = stop.changed() => break,
                }
            }
        });

        Self {
            handle: Some(handle),
            shutdown,
            reports,
        }
    }

    /// Idempotent; the first call stops the task and waits for it.
    pub async fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown.send(true);
            let _ = handle.await;
        }
    }

    pub fn reports_emitted(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}

/// Runs the whole benchmark with the default synthetic workload.
pub async fn run(config: &Config, connector: Arc<dyn Connector>) -> anyhow::Result<RunReport> {
    let books = config.workload.books;
    let seed = config.workload.seed;
    run_with_sources(config, connector, |stream| {
        Box::new(ReviewGenerator::new(books, seed, stream as u64))
    })
    .await
}

/// Same as [`run`], with the per-worker review source supplied by the
/// caller. `make_source` is invoked once per worker index.
pub async fn run_with_sources<F>(
    config: &Config,
    connector: Arc<dyn Connector>,
    make_source: F,
) -> anyhow::Result<RunReport>
where
    F: Fn(usize) -> Box<dyn ReviewSource>,
{
    config.validate().context("invalid configuration")?;
    let endpoints = config.target.parsed_endpoints()?;
    log_config(config);

    let sessions = Arc::new(
        connect_all(connector, &endpoints, RetryBackoff::default())
            .await
            .context("establish sessions")?,
    );

    info!("Populating static book table");
    sessions
        .first()
        .initialize(config.workload.books, BOOK_NAMES_CSV)
        .await
        .context("populate static book table")?;

    let totals = Arc::new(ReviewTotals::default());
    let recorder = Arc::new(StatsRecorder::new()?);
    let classifier = Arc::new(CallClassifier::new(totals.clone(), recorder.clone()));
    let periodic = StatsContext::new(recorder.clone());
    let full = StatsContext::new(recorder.clone());
    let phase = Arc::new(PhaseFlag::new());

    let workers = (0..config.benchmark.workers as usize)
        .map(|stream| {
            Worker::new(
                make_source(stream),
                sessions.clone(),
                phase.clone(),
                classifier.clone(),
                config.workload.max_reviews,
            )
        })
        .collect();
    let pool = WorkerPool::spawn(workers);

    info!("Warming up for {}s...", config.benchmark.warmup_secs);
    sleep(Duration::from_secs(config.benchmark.warmup_secs)).await;

    // Measurement starts here: flip the phase and zero both baselines so
    // warmup traffic is invisible to the statistics.
    phase.advance(RunPhase::Measuring);
    full.fetch_and_reset();
    periodic.fetch_and_reset();

    let mut reporter = PeriodicReporter::start(
        periodic,
        recorder.clone(),
        Duration::from_secs(config.benchmark.display_interval_secs),
        config.benchmark.latency_report,
    );

    info!("Running benchmark for {}s...", config.benchmark.duration_secs);
    sleep(Duration::from_secs(config.benchmark.duration_secs)).await;

    phase.advance(RunPhase::Stopped);
    reporter.cancel().await;
    pool.join().await?;

    let standings = match sessions.first().standings().await {
        Ok(standings) => standings,
        Err(e) => {
            warn!("Failed to fetch review standings: {e}");
            Vec::new()
        }
    };

    Ok(RunReport {
        totals: totals.snapshot(),
        stats: full.fetch(),
        standings,
    })
}

fn log_config(config: &Config) {
    info!(
        "Benchmark: {} worker(s), warmup {}s, duration {}s, report every {}s",
        config.benchmark.workers,
        config.benchmark.warmup_secs,
        config.benchmark.duration_secs,
        config.benchmark.display_interval_secs,
    );
    info!(
        "Workload: {} books, max {} reviews per reviewer, seed {:?}",
        config.workload.books, config.workload.max_reviews, config.workload.seed,
    );
    info!("Targets: {}", config.target.endpoints.join(", "));
    if config.benchmark.latency_report {
        info!("Latency report enabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::CallDisposition;

    #[tokio::test(start_paused = true)]
    async fn test_reporter_emits_once_per_interval() {
        let recorder = Arc::new(StatsRecorder::new().unwrap());
        let context = StatsContext::new(recorder.clone());
        let mut reporter =
            PeriodicReporter::start(context, recorder.clone(), Duration::from_secs(1), false);

        recorder.record_call(CallDisposition::Accepted, Duration::from_millis(2), None);
        sleep(Duration::from_millis(3500)).await;
        assert_eq!(reporter.reports_emitted(), 3);

        reporter.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_report_after_cancel_returns() {
        let recorder = Arc::new(StatsRecorder::new().unwrap());
        let context = StatsContext::new(recorder.clone());
        let mut reporter =
            PeriodicReporter::start(context, recorder.clone(), Duration::from_secs(1), false);

        sleep(Duration::from_millis(2500)).await;
        reporter.cancel().await;
        let emitted = reporter.reports_emitted();

        sleep(Duration::from_secs(10)).await;
        assert_eq!(reporter.reports_emitted(), emitted);

        // A second cancel is a no-op.
        reporter.cancel().await;
    }
}
