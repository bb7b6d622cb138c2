//! Forward advisory scanner
//!
//! Aggregates advisories from the configured feeds, filters them by severity,
//! asks the text generator for a patch proposal per advisory and ranks the
//! proposals by impact. Feeds currently serve a built-in advisory sample.

use chrono::{DateTime, Utc};
use mend_capability::TextGeneration;
use mend_core::prompt::strip_code_fence;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Known feeds and their upstream locations
pub const KNOWN_FEEDS: &[(&str, &str)] = &[
    ("cve", "https://cve.mitre.org/data/downloads/allitems-cvrf.xml"),
    ("npm", "https://github.com/advisories?query=ecosystem%3Anpm"),
    ("pypi", "https://pyup.io/safety/data/"),
];

/// Popularity factor applied to every package until download stats exist
pub const PACKAGE_POPULARITY: f64 = 0.8;

/// Impact above which a finding is high risk
pub const HIGH_RISK_THRESHOLD: f64 = 0.8;

/// Confidence assumed by the impact score when a proposal carries none
const DEFAULT_IMPACT_CONFIDENCE: f64 = 0.5;

pub const RESULTS_FILE: &str = "cve_scan_results.json";
pub const HIGH_RISK_FILE: &str = "high_risk_findings.json";

/// Advisory severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Weight in the impact score
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.6,
            Self::Low => 0.4,
        }
    }
}

/// One published vulnerability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: String,
    pub severity: Severity,
    pub description: String,
    pub affected_packages: Vec<String>,
    pub published: DateTime<Utc>,
    /// CVSS base score
    pub score: f64,
}

/// Advisories served by every feed
#[must_use]
pub fn sample_advisories(published: DateTime<Utc>) -> Vec<Advisory> {
    vec![
        Advisory {
            id: "CVE-2024-12345".to_string(),
            severity: Severity::Critical,
            description: "Remote code execution in popular library".to_string(),
            affected_packages: vec!["requests".to_string(), "urllib3".to_string()],
            published,
            score: 9.8,
        },
        Advisory {
            id: "CVE-2024-12346".to_string(),
            severity: Severity::High,
            description: "SQL injection vulnerability".to_string(),
            affected_packages: vec!["sqlalchemy".to_string()],
            published,
            score: 8.5,
        },
    ]
}

/// Generator's patch proposal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchProposal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_strategy: Option<String>,
    /// Self-reported confidence in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Root cause, code changes, testing notes and anything else returned
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl PatchProposal {
    /// Proposal standing in for a failed generation
    #[must_use]
    pub fn manual_review(error: impl Into<String>) -> Self {
        Self {
            patch_strategy: Some("Manual review required".to_string()),
            confidence: Some(0.0),
            error: Some(error.into()),
            details: Map::new(),
        }
    }

    /// Parse generator output; confidence is clamped to `[0, 1]`
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut proposal: Self = serde_json::from_str(strip_code_fence(text))?;
        proposal.confidence = proposal
            .confidence
            .map(|c| if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) });
        Ok(proposal)
    }
}

/// Proposal ranked for triage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCandidate {
    pub vulnerability: Advisory,
    pub patch: PatchProposal,
    pub confidence: f64,
    pub impact_score: f64,
}

impl PatchCandidate {
    #[inline]
    #[must_use]
    pub fn is_high_risk(&self) -> bool {
        self.impact_score > HIGH_RISK_THRESHOLD
    }
}

/// Scan output written to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_timestamp: DateTime<Utc>,
    pub vulnerabilities_found: usize,
    pub patch_candidates: Vec<PatchCandidate>,
    pub high_risk_findings: Vec<PatchCandidate>,
}

impl ScanReport {
    #[must_use]
    pub fn new(scan_timestamp: DateTime<Utc>, vulnerabilities_found: usize, patch_candidates: Vec<PatchCandidate>) -> Self {
        let high_risk_findings = patch_candidates
            .iter()
            .filter(|c| c.is_high_risk())
            .cloned()
            .collect();
        Self {
            scan_timestamp,
            vulnerabilities_found,
            patch_candidates,
            high_risk_findings,
        }
    }

    /// Write the full report and the high-risk subset into `dir`
    pub fn write_to(&self, dir: &Path) -> io::Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let results = dir.join(RESULTS_FILE);
        let high_risk = dir.join(HIGH_RISK_FILE);
        std::fs::write(&results, serde_json::to_vec_pretty(self)?)?;
        std::fs::write(&high_risk, serde_json::to_vec_pretty(&self.high_risk_findings)?)?;
        Ok((results, high_risk))
    }
}

/// Impact used to prioritise findings
#[must_use]
pub fn impact_score(advisory: &Advisory, proposal: &PatchProposal) -> f64 {
    let confidence = proposal.confidence.unwrap_or(DEFAULT_IMPACT_CONFIDENCE);
    advisory.severity.weight() * confidence * PACKAGE_POPULARITY
}

/// Scanner driving the text generator
pub struct ForwardScanner {
    generator: Arc<dyn TextGeneration>,
}

impl ForwardScanner {
    #[must_use]
    pub fn new(generator: Arc<dyn TextGeneration>) -> Self {
        Self { generator }
    }

    /// Advisories from `feeds` matching `severities`, first occurrence of each id
    #[must_use]
    pub fn scan(&self, feeds: &[String], severities: &[Severity], now: DateTime<Utc>) -> Vec<Advisory> {
        let mut seen = HashSet::new();
        let mut advisories = Vec::new();

        for feed in feeds {
            let Some((_, url)) = KNOWN_FEEDS.iter().find(|(name, _)| name == feed) else {
                warn!(feed = %feed, "unknown feed, skipping");
                continue;
            };
            debug!(feed = %feed, url, "scanning feed");
            for advisory in sample_advisories(now) {
                if severities.contains(&advisory.severity) && seen.insert(advisory.id.clone()) {
                    advisories.push(advisory);
                }
            }
        }

        info!(found = advisories.len(), "feed scan finished");
        advisories
    }

    /// Ask the generator for a patch per advisory
    pub async fn patch_candidates(&self, advisories: &[Advisory]) -> Vec<PatchCandidate> {
        let mut candidates = Vec::with_capacity(advisories.len());
        for advisory in advisories {
            let patch = self.propose(advisory).await;
            candidates.push(PatchCandidate {
                confidence: patch.confidence.unwrap_or(0.0),
                impact_score: impact_score(advisory, &patch),
                vulnerability: advisory.clone(),
                patch,
            });
        }
        candidates
    }

    async fn propose(&self, advisory: &Advisory) -> PatchProposal {
        let prompt = patch_prompt(advisory);
        let outcome = match self.generator.generate(&prompt).await {
            Ok(text) => PatchProposal::parse(&text).map_err(|e| format!("malformed proposal: {e}")),
            Err(e) => Err(e.to_string()),
        };
        outcome.unwrap_or_else(|e| {
            warn!(advisory = %advisory.id, error = %e, "patch generation failed");
            PatchProposal::manual_review(e)
        })
    }
}

/// Prompt asking for a patch proposal
#[must_use]
pub fn patch_prompt(advisory: &Advisory) -> String {
    format!(
        "Analyze this vulnerability and generate a patch:\n\n\
         CVE ID: {}\n\
         Severity: {:?}\n\
         Description: {}\n\
         Affected Packages: {}\n\n\
         Generate:\n\
         1. root_cause: root cause analysis\n\
         2. patch_strategy: patch strategy\n\
         3. code_changes: code changes (if applicable)\n\
         4. testing: testing recommendations\n\
         5. confidence: confidence score (0-1)\n\n\
         Return as a JSON object.",
        advisory.id,
        advisory.severity,
        advisory.description,
        advisory.affected_packages.join(", "),
    )
}
