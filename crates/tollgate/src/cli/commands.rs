//! CLI command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tollgate - inspect and exercise a shared API quota
#[derive(Parser, Debug)]
#[command(name = "tollgate")]
#[command(about = "Inspect and exercise a quota shared by cooperating processes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Load configuration from this file instead of the default search path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the shared state and lock files
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Calls allowed per window across all processes
    #[arg(long, global = true)]
    pub limit: Option<u32>,

    /// Sliding window length in seconds
    #[arg(long, global = true)]
    pub window_seconds: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show utilisation of the shared window
    Status,

    /// Check lock, state file and clocks; exits non-zero when unhealthy
    Health,

    /// Clear the shared window
    Reset,

    /// Acquire slots from the shared window
    Acquire {
        /// Number of slots to acquire, one at a time
        #[arg(long, default_value = "1")]
        count: u32,

        /// Timeout for each slot, in milliseconds
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,

        /// Name recorded as the last writer
        #[arg(long)]
        identity: Option<String>,
    },

    /// Compute the wait before a retry
    Backoff {
        /// Zero-based number of failed attempts so far
        #[arg(long)]
        attempt: u32,

        /// Server retry hint (seconds or HTTP-date)
        #[arg(long)]
        retry_after: Option<String>,

        /// Disable jitter regardless of configuration
        #[arg(long)]
        no_jitter: bool,
    },
}
