//! # stagegate CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create the pipeline database
//! - `create` - Register a new opportunity at Discovery
//! - `list` - List opportunities
//! - `show` - Show one opportunity with its audit log, requests and SLA
//! - `artifact` - Attach an artifact reference
//! - `advance` - Request a stage move (commits, or opens an approval request)
//! - `approvals` - List approval requests
//! - `decide` - Approve or reject a request
//! - `expire` - Run one expiry sweep
//! - `sweep` - Run the expiry sweep periodically until Ctrl-C
//! - `compact` - Reclaim free space in the database file
//! - `rules` - Print the stage rule table
//! - `check` - Ask the transition validator about two stage codes

mod commands;

use crate::config::{AppConfig, BackendKind};
use clap::{Parser, Subcommand};
use stagegate_core::PipelineError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// stagegate - opportunity stage pipeline with approval gates
#[derive(Parser, Debug)]
#[command(name = "stagegate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the pipeline database
    #[arg(
        short = 'D',
        long,
        global = true,
        env = "STAGEGATE_DB",
        default_value = "stagegate.redb"
    )]
    pub database: PathBuf,

    /// Path to the configuration file
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "STAGEGATE_CONFIG",
        default_value = "stagegate.toml"
    )]
    pub config: PathBuf,

    /// Storage backend (overrides the config file)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<BackendKind>,

    /// Who is acting; recorded on transitions, requests and decisions
    #[arg(
        short = 'a',
        long,
        global = true,
        env = "STAGEGATE_ACTOR",
        default_value = "cli"
    )]
    pub actor: String,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the pipeline database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Register a new opportunity
    Create {
        /// Short title
        title: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Business owner; fills the BD_OWNER approver slot
        #[arg(short, long)]
        owner: Option<String>,

        /// Originating signal reference
        #[arg(long)]
        signal: Option<String>,

        /// Brief reference
        #[arg(long)]
        brief: Option<String>,
    },

    /// List opportunities
    List {
        /// Only opportunities in this stage (code, e.g. 03_GATE1)
        #[arg(short, long)]
        stage: Option<String>,
    },

    /// Show one opportunity
    Show { id: String },

    /// Attach an artifact reference to an opportunity
    Artifact {
        id: String,
        key: String,
        reference: String,
    },

    /// Request a stage move
    Advance {
        id: String,

        /// Target stage code; omit with --auto
        #[arg(short, long, required_unless_present = "auto")]
        to: Option<String>,

        /// Advance to the next stage if it needs no sign-off
        #[arg(long, conflicts_with_all = ["to", "force_approval"])]
        auto: bool,

        /// Reason or notes; required for HOLD and DROP
        #[arg(short, long)]
        reason: Option<String>,

        /// Artifact supplied with the move (repeatable)
        #[arg(long = "artifact", value_name = "KEY=REF", value_parser = parse_key_val)]
        artifacts: Vec<(String, String)>,

        /// Request sign-off even where approval is optional
        #[arg(long)]
        force_approval: bool,

        /// Assign a user to an approver role (repeatable)
        #[arg(long = "assign", value_name = "ROLE=USER", value_parser = parse_key_val)]
        assignees: Vec<(String, String)>,

        /// Days until the approval request expires
        #[arg(long)]
        expires_days: Option<i64>,
    },

    /// List approval requests (pending ones by default)
    Approvals {
        /// All requests of one opportunity, any status
        #[arg(short, long)]
        opportunity: Option<String>,
    },

    /// Approve or reject an approval request as --actor
    Decide {
        request_id: String,

        /// approve | reject
        decision: String,

        #[arg(long)]
        comments: Option<String>,
    },

    /// Expire overdue approval requests once
    Expire,

    /// Expire overdue approval requests periodically until Ctrl-C
    Sweep {
        /// Seconds between sweeps
        #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
        every: u64,
    },

    /// Reclaim free space in the database file
    Compact,

    /// Print the stage rule table
    Rules,

    /// Check whether a move between two stage codes is legal
    Check { from: String, to: String },
}

/// Parse `KEY=VALUE`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), PipelineError> {
    let config = AppConfig::load(&cli.config)?;
    let ctx = Context {
        database: cli.database,
        backend: cli.backend.unwrap_or(config.storage.backend),
        pipeline_config: config.pipeline_config()?,
        actor: cli.actor,
        json_mode: cli.json_mode,
    };

    match cli.command {
        Commands::Init { force } => cmd_init(&ctx, force),
        Commands::Create {
            title,
            description,
            owner,
            signal,
            brief,
        } => cmd_create(&ctx, title, description, owner, signal, brief),
        Commands::List { stage } => cmd_list(&ctx, stage.as_deref()),
        Commands::Show { id } => cmd_show(&ctx, &id),
        Commands::Artifact { id, key, reference } => cmd_artifact(&ctx, &id, &key, &reference),
        Commands::Advance {
            id,
            to,
            auto,
            reason,
            artifacts,
            force_approval,
            assignees,
            expires_days,
        } => {
            if auto {
                cmd_auto_advance(&ctx, &id)
            } else {
                cmd_advance(
                    &ctx,
                    &id,
                    to.as_deref().unwrap_or_default(),
                    AdvanceArgs {
                        reason,
                        artifacts,
                        force_approval,
                        assignees,
                        expires_days,
                    },
                )
            }
        }
        Commands::Approvals { opportunity } => cmd_approvals(&ctx, opportunity.as_deref()),
        Commands::Decide {
            request_id,
            decision,
            comments,
        } => cmd_decide(&ctx, &request_id, &decision, comments),
        Commands::Expire => cmd_expire(&ctx),
        Commands::Sweep { every } => cmd_sweep(&ctx, every).await,
        Commands::Compact => cmd_compact(&ctx),
        Commands::Rules => cmd_rules(&ctx),
        Commands::Check { from, to } => cmd_check(&ctx, &from, &to),
    }
}
