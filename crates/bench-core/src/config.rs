use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::connect::Endpoint;

/// Book id the generator substitutes to simulate invalid input. Must stay
/// outside any realistic `books` domain.
pub const INVALID_BOOK_ID: u32 = 999;

/// Static book table used to initialize the review service.
pub const BOOK_NAMES_CSV: &str = "Atlas Shrugged, Autobiography of a Yogi, Fountain Head, \
     My Experiments with Truth, We The People, Autobiography of Swamy Vivekananda";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub benchmark: BenchmarkConfig,
    pub target: TargetConfig,
    pub workload: WorkloadConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Rejects unusable settings before any connection is attempted.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.benchmark.duration_secs == 0 {
            anyhow::bail!("benchmark.duration_secs must be greater than zero");
        }
        if self.benchmark.display_interval_secs == 0 {
            anyhow::bail!("benchmark.display_interval_secs must be greater than zero");
        }
        if self.benchmark.workers == 0 {
            anyhow::bail!("benchmark.workers must be greater than zero");
        }
        if self.target.endpoints.is_empty() {
            anyhow::bail!("target.endpoints must list at least one endpoint");
        }
        if self.target.timeout_ms == 0 {
            anyhow::bail!("target.timeout_ms must be greater than zero");
        }
        if self.workload.books == 0 {
            anyhow::bail!("workload.books must be greater than zero");
        }
        if self.workload.max_reviews == 0 {
            anyhow::bail!("workload.max_reviews must be greater than zero");
        }
        self.target.parsed_endpoints()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Warmup period in seconds; load is generated but not counted. May be zero.
    pub warmup_secs: u64,
    /// Measured benchmark duration in seconds.
    pub duration_secs: u64,
    /// Interval between periodic progress reports in seconds.
    pub display_interval_secs: u64,
    /// Number of concurrent review workers.
    pub workers: u32,
    /// Report latency percentiles and histogram in the final output.
    #[serde(default)]
    pub latency_report: bool,
    /// Optional path for the final summary in metric,value CSV form.
    #[serde(default)]
    pub results_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Review service endpoints as "host" or "host:port".
    pub endpoints: Vec<String>,
    /// Request timeout in milliseconds (transport-level only).
    pub timeout_ms: u64,
}

impl TargetConfig {
    pub fn parsed_endpoints(&self) -> anyhow::Result<Vec<Endpoint>> {
        self.endpoints.iter().map(|s| s.parse()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of books in the static table; review targets are drawn from [1, books].
    pub books: u32,
    /// Per-reviewer cap enforced by the service.
    pub max_reviews: u32,
    /// Deterministic seed for reproducible review generation.
    #[serde(default)]
    pub seed: Option<u64>,
}
