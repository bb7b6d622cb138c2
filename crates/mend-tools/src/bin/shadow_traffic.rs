//! Shadow traffic mirroring CLI

use anyhow::Context;
use clap::Parser;
use mend_tools::shadow::load_traffic;
use mend_tools::{init_tracing, MirrorConfig, MirrorReport, ShadowMirror};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::info;

/// Replay recorded traffic against a shadow deployment
#[derive(Parser)]
#[command(name = "shadow-traffic")]
#[command(about = "Shadow traffic mirroring", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON file of recorded requests
    #[arg(long)]
    source_logs: PathBuf,

    /// Fraction of requests to mirror
    #[arg(long, default_value_t = 0.1, value_parser = parse_fraction)]
    mirror_percentage: f64,

    /// Shadow base URL
    #[arg(long)]
    shadow_endpoint: String,

    /// Time budget in seconds
    #[arg(long, default_value_t = 3600)]
    duration: u64,

    /// Report file
    #[arg(long)]
    output: PathBuf,
}

fn parse_fraction(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err("must be between 0 and 1".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    let requests = load_traffic(&cli.source_logs)?;
    let config = MirrorConfig::new(cli.shadow_endpoint)
        .with_mirror_percentage(cli.mirror_percentage)
        .with_duration(cli.duration);
    let mirror = ShadowMirror::new(config)?;

    info!(
        samples = requests.len(),
        duration = cli.duration,
        "starting shadow traffic mirroring"
    );
    let results = mirror.mirror(&requests, &mut StdRng::from_os_rng()).await;
    let report = MirrorReport::new(mirror.config().clone(), results);

    std::fs::write(&cli.output, serde_json::to_vec_pretty(&report)?)
        .with_context(|| format!("writing report to {}", cli.output.display()))?;

    println!(
        "Shadow mirroring complete. {} requests processed.",
        report.summary.total_requests
    );
    println!("Success rate: {:.1}%", report.summary.success_rate());
    println!("Average latency: {:.1}ms", report.summary.average_latency);
    Ok(())
}
