use anyhow::{Context, Result};
use bench_core::{report, runner, Config, Connector, HttpConnector, MockBehavior, MockConnector};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "reviewbench")]
#[command(about = "Review service load benchmark - drives synthetic review traffic and reports statistics")]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config/example.toml")]
    config: PathBuf,

    /// Transport mode: mock or http
    #[arg(long, default_value = "mock")]
    mode: String,

    /// Worker count (overrides config)
    #[arg(long)]
    workers: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;
    if let Some(workers) = args.workers {
        config.benchmark.workers = workers;
    }

    let connector: Arc<dyn Connector> = match args.mode.as_str() {
        "mock" => Arc::new(MockConnector::new(
            MockBehavior::Faithful,
            Duration::from_millis(5), // simulated call latency
        )),
        "http" => Arc::new(
            HttpConnector::new(config.target.timeout_ms)
                .context("Failed to create HTTP connector")?,
        ),
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", args.mode),
    };

    info!("Starting benchmark in {} mode", args.mode);
    let run = runner::run(&config, connector).await?;

    report::print_results(
        &run.totals,
        &run.stats,
        &run.standings,
        config.benchmark.latency_report,
    );
    if let Some(path) = &config.benchmark.results_file {
        report::write_summary(path, &run.totals, &run.stats)?;
    }

    Ok(())
}
