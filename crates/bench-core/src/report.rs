use anyhow::Context;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::classify::TotalsSnapshot;
use crate::service::BookStanding;
use crate::stats::StatsSnapshot;

const HORIZONTAL_RULE: &str =
    "--------------------------------------------------------------------------------";

const PERCENTILE_LADDER: &[(f64, &str)] = &[
    (0.10, "10th percentile latency"),
    (0.25, "25th percentile latency"),
    (0.50, "50th percentile latency"),
    (0.75, "75th percentile latency"),
    (0.90, "90th percentile latency"),
    (0.95, "95th percentile latency"),
    (0.99, "99th percentile latency"),
    (0.995, "99.5th percentile latency"),
    (0.999, "99.9th percentile latency"),
];

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// The one-line periodic progress report.
pub fn format_progress_line(
    elapsed: Duration,
    window: &StatsSnapshot,
    rejections: u64,
    failures: u64,
    latency_report: bool,
) -> String {
    let mut line = format!(
        "{} Throughput {}/s, Rejects/Failures {}/{}",
        format_elapsed(elapsed),
        window.throughput().round() as u64,
        rejections,
        failures,
    );
    if latency_report {
        let _ = write!(
            line,
            ", Avg/95% Latency {:.2}/{:.2}ms",
            window.avg_latency_ms(),
            window.percentile_ms(0.95)
        );
    }
    line
}

/// Prints the final console report for the whole measured window.
pub fn print_results(
    totals: &TotalsSnapshot,
    stats: &StatsSnapshot,
    standings: &[BookStanding],
    latency_report: bool,
) {
    println!();
    println!("{HORIZONTAL_RULE}");
    println!(" Results");
    println!("{HORIZONTAL_RULE}");
    println!();
    println!("A total of {} reviews were received...", stats.invocations);
    println!(" - {:9} Accepted", totals.accepted);
    println!(" - {:9} Rejected (Invalid Book)", totals.rejected_invalid_book);
    println!(
        " - {:9} Rejected (Maximum Review Count Reached)",
        totals.rejected_over_limit
    );
    println!(" - {:9} Failed (Transaction Error)", totals.failed);

    if !standings.is_empty() {
        println!();
        println!("Book Name\t\tReviews Received");
        for standing in standings {
            println!("{}\t\t{:14}", standing.book_name, standing.reviews);
        }
        println!();
        println!("The Winner is: {}", standings[0].book_name);
    }

    println!();
    println!("{HORIZONTAL_RULE}");
    println!(" Client Workload Statistics");
    println!("{HORIZONTAL_RULE}");
    println!("Average throughput:            {:9.0} txns/sec", stats.throughput());

    if latency_report {
        println!("Average latency:               {:9.2} ms", stats.avg_latency_ms());
        for (quantile, label) in PERCENTILE_LADDER {
            println!("{label}:       {:9.2} ms", stats.percentile_ms(*quantile));
        }

        println!();
        println!("{HORIZONTAL_RULE}");
        println!(" System Server Statistics");
        println!("{HORIZONTAL_RULE}");
        println!("Reported Internal Avg Latency: {:9.2} ms", stats.internal_avg_ms());

        println!();
        println!("{HORIZONTAL_RULE}");
        println!(" Latency Histogram");
        println!("{HORIZONTAL_RULE}");
        println!("{}", histogram_report(stats));
    }
}

/// Renders the roundtrip latency distribution in fixed-width ms buckets.
pub fn histogram_report(stats: &StatsSnapshot) -> String {
    let histogram = stats.roundtrip_histogram();
    let total = histogram.len();
    if total == 0 {
        return "  (no latency samples)".to_string();
    }

    // Aim for roughly ten rows regardless of the latency range.
    let step = (histogram.max() / 10).max(1_000);
    let mut out = String::new();
    let mut cumulative = 0u64;
    for value in histogram.iter_linear(step) {
        cumulative += value.count_since_last_iteration();
        let _ = writeln!(
            out,
            "  <= {:8.1} ms {:10} {:7.2}%",
            value.value_iterated_to() as f64 / 1000.0,
            value.count_since_last_iteration(),
            cumulative as f64 * 100.0 / total as f64,
        );
        if cumulative >= total {
            break;
        }
    }
    out
}

/// Writes the cumulative summary as metric,value lines.
pub fn write_summary(
    path: &str,
    totals: &TotalsSnapshot,
    stats: &StatsSnapshot,
) -> anyhow::Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "timestamp,{}", chrono::Utc::now().to_rfc3339());
    let _ = writeln!(out, "duration_ms,{}", stats.window.as_millis());
    let _ = writeln!(out, "invocations,{}", stats.invocations);
    let _ = writeln!(out, "accepted,{}", totals.accepted);
    let _ = writeln!(out, "rejected_invalid_book,{}", totals.rejected_invalid_book);
    let _ = writeln!(out, "rejected_over_limit,{}", totals.rejected_over_limit);
    let _ = writeln!(out, "failed,{}", totals.failed);
    let _ = writeln!(out, "throughput_tps,{:.2}", stats.throughput());
    let _ = writeln!(out, "avg_latency_ms,{:.2}", stats.avg_latency_ms());
    let _ = writeln!(out, "p95_latency_ms,{:.2}", stats.percentile_ms(0.95));
    let _ = writeln!(out, "p99_latency_ms,{:.2}", stats.percentile_ms(0.99));

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }
    std::fs::write(path, out).with_context(|| format!("write summary to {path}"))?;
    info!("Summary written to {path}");
    Ok(())
}
