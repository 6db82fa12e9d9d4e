//! SiteDesk outbox CLI
//!
//! Command-line tools for inspecting and repairing an outbox journal.
//!
//! # Commands
//!
//! - `status` - Show the pending count and status label
//! - `list` - List pending mutations in replay order
//! - `enqueue` - Queue a mutation by hand
//! - `dead-letters` - List dead letters
//! - `requeue` / `discard` - Resolve a dead letter
//! - `drain` - Replay the queue against a server once
//! - `verify` - Check journal integrity
//! - `dump` - Dump journal records for debugging
//! - `compact` - Rewrite the journal without dead records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SiteDesk outbox journal tools.
#[derive(Parser)]
#[command(name = "sitedesk-outbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
    #[arg(global = true, short, long)]
    journal: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the pending count and status label
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending mutations in replay order
    List {
        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Queue a mutation by hand
    Enqueue {
        /// HTTP method (POST, PUT, PATCH, DELETE)
        method: String,

        /// Endpoint path, e.g. /widgets/42
        endpoint: String,

        /// JSON body
        #[arg(short, long, default_value = "null")]
        data: String,
    },

    /// List dead letters
    DeadLetters {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Move a dead letter back to the tail of the queue
    Requeue {
        /// Mutation id
        id: String,
    },

    /// Drop a dead letter for good
    Discard {
        /// Mutation id
        id: String,
    },

    /// Replay the queue against a server once
    Drain {
        /// Base URL of the API server
        #[arg(short, long)]
        base_url: String,

        /// Per-request timeout in seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Treat any response as applied, regardless of status
        #[arg(long)]
        any_response: bool,
    },

    /// Check journal integrity
    Verify,

    /// Dump journal records for debugging
    Dump {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the journal without dead records
    Compact {
        /// Show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("sitedesk-outbox v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let journal = cli.journal.ok_or("Journal path required (--journal)")?;
    match cli.command {
        Commands::Status { format } => commands::status::run(&journal, &format)?,
        Commands::List { limit, format } => commands::status::list(&journal, limit, &format)?,
        Commands::Enqueue {
            method,
            endpoint,
            data,
        } => commands::enqueue::run(&journal, &method, &endpoint, &data)?,
        Commands::DeadLetters { format } => commands::dead_letters::list(&journal, &format)?,
        Commands::Requeue { id } => commands::dead_letters::requeue(&journal, &id)?,
        Commands::Discard { id } => commands::dead_letters::discard(&journal, &id)?,
        Commands::Drain {
            base_url,
            timeout,
            any_response,
        } => commands::drain::run(&journal, &base_url, timeout, any_response)?,
        Commands::Verify => commands::verify::run(&journal)?,
        Commands::Dump { limit, format } => commands::dump::run(&journal, limit, &format)?,
        Commands::Compact { dry_run } => commands::compact::run(&journal, dry_run)?,
        Commands::Version => {}
    }

    Ok(())
}
