use anyhow::Context;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Roundtrips above one minute saturate the top bucket.
const LATENCY_MAX_MICROS: u64 = 60_000_000;
const LATENCY_SIGFIGS: u8 = 3;

/// How a completed call is tallied by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDisposition {
    Accepted,
    Rejected,
    Failed,
}

/// Shared call statistics: atomic tallies plus roundtrip/internal latency
/// histograms. Written by every worker, read by the periodic reporter and
/// the final report through [`StatsContext`] baselines.
pub struct StatsRecorder {
    invocations: AtomicU64,
    rejections: AtomicU64,
    failures: AtomicU64,
    roundtrip: Mutex<Histogram<u64>>,
    internal: Mutex<Histogram<u64>>,
}

impl StatsRecorder {
    pub fn new() -> anyhow::Result<Self> {
        let roundtrip = Histogram::new_with_bounds(1, LATENCY_MAX_MICROS, LATENCY_SIGFIGS)
            .context("init roundtrip latency histogram")?;
        let internal = Histogram::new_with_bounds(1, LATENCY_MAX_MICROS, LATENCY_SIGFIGS)
            .context("init internal latency histogram")?;
        Ok(Self {
            invocations: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            roundtrip: Mutex::new(roundtrip),
            internal: Mutex::new(internal),
        })
    }

    /// Records one completed call. Failed calls carry no usable
    /// round-trip figure and skip the latency histogram.
    pub fn record_call(
        &self,
        disposition: CallDisposition,
        roundtrip: Duration,
        internal: Option<Duration>,
    ) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        match disposition {
            CallDisposition::Accepted => {}
            CallDisposition::Rejected => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
            }
            CallDisposition::Failed => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        if disposition != CallDisposition::Failed {
            let micros = roundtrip.as_micros().min(u128::from(u64::MAX)) as u64;
            self.roundtrip.lock().saturating_record(micros.max(1));
        }
        if let Some(internal) = internal {
            let micros = internal.as_micros().min(u128::from(u64::MAX)) as u64;
            self.internal.lock().saturating_record(micros.max(1));
        }
    }

    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

struct Baseline {
    at: Instant,
    invocations: u64,
    rejections: u64,
    failures: u64,
    roundtrip: Histogram<u64>,
    internal: Histogram<u64>,
}

impl Baseline {
    fn capture(recorder: &StatsRecorder) -> Self {
        Self {
            at: Instant::now(),
            invocations: recorder.invocations(),
            rejections: recorder.rejections(),
            failures: recorder.failures(),
            roundtrip: recorder.roundtrip.lock().clone(),
            internal: recorder.internal.lock().clone(),
        }
    }
}

/// A baseline over a [`StatsRecorder`]. `fetch` reads the window since the
/// baseline; `fetch_and_reset` additionally starts a new window. Several
/// contexts can observe one recorder independently.
pub struct StatsContext {
    recorder: Arc<StatsRecorder>,
    baseline: Mutex<Baseline>,
}

impl StatsContext {
    pub fn new(recorder: Arc<StatsRecorder>) -> Self {
        let baseline = Baseline::capture(&recorder);
        Self {
            recorder,
            baseline: Mutex::new(baseline),
        }
    }

    pub fn fetch(&self) -> StatsSnapshot {
        let baseline = self.baseline.lock();
        let current = Baseline::capture(&self.recorder);
        diff(&current, &baseline)
    }

    pub fn fetch_and_reset(&self) -> StatsSnapshot {
        let mut baseline = self.baseline.lock();
        let current = Baseline::capture(&self.recorder);
        let snapshot = diff(&current, &baseline);
        *baseline = current;
        snapshot
    }
}

fn diff(current: &Baseline, baseline: &Baseline) -> StatsSnapshot {
    let mut roundtrip = current.roundtrip.clone();
    let _ = roundtrip.subtract(&baseline.roundtrip);
    let mut internal = current.internal.clone();
    let _ = internal.subtract(&baseline.internal);

    StatsSnapshot {
        window: current.at.duration_since(baseline.at),
        invocations: current.invocations - baseline.invocations,
        rejections: current.rejections - baseline.rejections,
        failures: current.failures - baseline.failures,
        roundtrip,
        internal,
    }
}

/// Immutable view over one statistics window.
#[derive(Debug)]
pub struct StatsSnapshot {
    pub window: Duration,
    pub invocations: u64,
    pub rejections: u64,
    pub failures: u64,
    roundtrip: Histogram<u64>,
    internal: Histogram<u64>,
}

impl StatsSnapshot {
    /// Completed calls per second over the window.
    pub fn throughput(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.invocations as f64 / secs
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.roundtrip.mean() / 1000.0
    }

    pub fn percentile_ms(&self, quantile: f64) -> f64 {
        self.roundtrip.value_at_quantile(quantile) as f64 / 1000.0
    }

    pub fn internal_avg_ms(&self) -> f64 {
        self.internal.mean() / 1000.0
    }

    pub fn roundtrip_histogram(&self) -> &Histogram<u64> {
        &self.roundtrip
    }
}
