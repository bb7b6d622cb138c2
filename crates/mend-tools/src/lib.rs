//! Mend Tools - operational CLIs
//!
//! - [`scanner`]: forward advisory scanner that asks the text generator for
//!   patch proposals and ranks them by impact
//! - [`shadow`]: replays sampled traffic against a shadow deployment

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod scanner;
pub mod shadow;

pub use scanner::{Advisory, ForwardScanner, PatchCandidate, PatchProposal, ScanReport, Severity};
pub use shadow::{MirrorConfig, MirrorReport, MirrorResult, ShadowError, ShadowMirror, TrafficRequest};

/// Initialise stderr logging for the CLIs; `RUST_LOG` wins over `default_level`
pub fn init_tracing(default_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
