//! Tollgate CLI binary.
//!
//! Operator access to the shared quota:
//! - Inspect utilisation and health of the shared window
//! - Reset stuck state
//! - Acquire slots (useful for smoke tests and shell pipelines)
//! - Compute retry delays under the configured policy

use clap::Parser;
use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    use cli::{Cli, handle_command};

    // Parse command-line arguments
    let cli = Cli::parse();

    tollgate::telemetry::init_console_telemetry(cli.verbose, cli.log_json);

    match handle_command(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}
