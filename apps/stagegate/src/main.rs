//! # stagegate
//!
//! Opportunity stage pipeline with human-in-the-loop approval gates.
//!
//! ## Usage
//!
//! ```bash
//! stagegate init
//! stagegate create "Regional grid analytics" --owner alice --signal SIG-17
//! stagegate advance OPP-2026-001 --to 02_IDEA_CARD
//! stagegate advance OPP-2026-001 --to 03_GATE1 --artifact scorecard_id=SC-9
//! stagegate approvals
//! stagegate --actor alice decide APR-2026-1017093000-00000001 approve
//! stagegate sweep --every 300
//! ```

use clap::Parser;
use stagegate::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // STAGEGATE_LOG_FORMAT=json switches to machine-parseable logs.
    let log_format = std::env::var("STAGEGATE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stagegate=info,stagegate_core=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
