//! Forward advisory scanner CLI

use anyhow::Context;
use clap::{Parser, ValueEnum};
use mend_capability::{GenerationConfig, OpenAiGenerator};
use mend_core::MendConfig;
use mend_tools::{init_tracing, ForwardScanner, ScanReport, Severity};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Scan advisory feeds and draft patch proposals
#[derive(Parser)]
#[command(name = "forward-scanner")]
#[command(about = "Forward-looking advisory scanner", long_about = None)]
#[command(version)]
struct Cli {
    /// Feeds to scan
    #[arg(long, num_args = 1.., default_values_t = vec!["cve".to_string()])]
    feeds: Vec<String>,

    /// Severity levels to keep
    #[arg(long, value_enum, num_args = 1.., default_values_t = vec![Severity::Critical, Severity::High])]
    severity: Vec<Severity>,

    /// Scan only, no patch generation or output files
    #[arg(long)]
    dry_run: bool,

    /// Summary format on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    output_format: OutputFormat,

    /// Directory for result files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Configuration file for the text generation provider
    #[arg(short, long, env = "MEND_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing("info");

    let generation = match &cli.config {
        Some(path) => MendConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?
            .generation,
        None => GenerationConfig::default(),
    };
    let generator = OpenAiGenerator::from_env(generation).context("building text generation client")?;
    let scanner = ForwardScanner::new(Arc::new(generator));

    let now = chrono::Utc::now();
    let advisories = scanner.scan(&cli.feeds, &cli.severity, now);

    if cli.dry_run {
        match cli.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&advisories)?),
            OutputFormat::Text => {
                for advisory in &advisories {
                    println!("{} [{:?}] {}", advisory.id, advisory.severity, advisory.description);
                }
            }
        }
        println!("Dry run mode - no patches generated");
        return Ok(());
    }

    let candidates = scanner.patch_candidates(&advisories).await;
    let report = ScanReport::new(now, advisories.len(), candidates);
    let (results, high_risk) = report
        .write_to(&cli.output_dir)
        .with_context(|| format!("writing results to {}", cli.output_dir.display()))?;
    info!(results = %results.display(), high_risk = %high_risk.display(), "scan results written");

    match cli.output_format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "vulnerabilities_found": report.vulnerabilities_found,
                "patch_candidates": report.patch_candidates.len(),
                "high_risk_findings": report.high_risk_findings.len(),
            }))?
        ),
        OutputFormat::Text => {
            println!("Scan complete. Found {} vulnerabilities.", report.vulnerabilities_found);
            println!("Generated {} patch candidates.", report.patch_candidates.len());
            println!("High-risk findings: {}", report.high_risk_findings.len());
        }
    }
    Ok(())
}
