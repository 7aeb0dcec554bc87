//! Twin Diagnostic CLI
//!
//! # Usage
//!
//! ```bash
//! twin-diag simulate --authority server -d '{"diag_enable":"true","diag_sample_rate":100}'
//! twin-diag check-config --config diag.toml --format json
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 3: Invalid input, arguments or configuration
//! - 10: Internal error

use clap::Parser;
use tracing::Level;
use twin_diag_cli::{run_cli, TwinDiagCli};

fn main() {
    let cli = TwinDiagCli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = run_cli(cli);
    std::process::exit(exit_code.into());
}
