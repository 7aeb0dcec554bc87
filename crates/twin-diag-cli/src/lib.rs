//! Twin Diagnostic CLI
//!
//! Local simulator for the diagnostic sampling layer. Every session runs
//! against the in-memory loopback transport, so nothing leaves the machine.
//!
//! ## CLI Usage
//!
//! ```bash
//! # Server-controlled session, cloud turns sampling on at 50%
//! twin-diag simulate --authority server \
//!     -d '{"desired":{"diag_enable":"true","diag_sample_rate":50}}' -n 20
//!
//! # Same, reading the document from a file and printing JSON
//! twin-diag simulate --config diag.toml -d @twin.json --format json
//!
//! # Validate configuration from TWIN_DIAG_* variables
//! twin-diag check-config
//! ```

pub mod commands;
pub mod output;

pub use commands::{ConfigArgs, SimulateArgs, TwinDiagCli, TwinDiagCommands};
pub use output::{ConfigReport, OutputFormat, SimulationReport};

use twin_diag_core::DiagError;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Invalid input, arguments or configuration
    InvalidInput = 3,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Classify a failed run
    pub fn from_error(error: &anyhow::Error) -> Self {
        let user_error = error
            .downcast_ref::<DiagError>()
            .is_some_and(DiagError::is_user_error);
        if user_error {
            ExitCode::InvalidInput
        } else {
            ExitCode::InternalError
        }
    }
}

/// Run the CLI with the given arguments
pub fn run(cli: TwinDiagCli) -> anyhow::Result<ExitCode> {
    match cli.command {
        TwinDiagCommands::Simulate(args) => commands::execute_simulate(args),
        TwinDiagCommands::CheckConfig { config, format } => {
            commands::execute_check_config(config, format)
        }
    }
}

/// Run the CLI and map any failure to an exit code
///
/// ```rust,no_run
/// use clap::Parser;
/// use twin_diag_cli::{run_cli, TwinDiagCli};
///
/// let exit_code = run_cli(TwinDiagCli::parse());
/// std::process::exit(exit_code.into());
/// ```
pub fn run_cli(cli: TwinDiagCli) -> ExitCode {
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from_error(&e)
        }
    }
}
