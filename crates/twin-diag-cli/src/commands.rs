//! CLI command definitions for the twin diagnostic simulator
//!
//! `simulate` drives a [`DiagnosticDeviceClient`] over the in-memory
//! transport; `check-config` resolves and validates the sampling
//! configuration without sending anything.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use twin_diag_core::{
    CallbackContext, DiagError, DiagnosticConfig, DiagnosticDeviceClient, LoopbackTransport,
    Message, SamplingAuthority, SamplingStrategyKind, StatusCode, TwinValue,
    config::DEFAULT_ENV_PREFIX,
};

use super::output::{ConfigReport, ForwardedProperty, OutputFormat, PolicyOutput, SimulationReport};
use super::ExitCode;

/// Connection string used when none is supplied
pub const DEMO_CONNECTION_STRING: &str =
    "HostName=localhost;DeviceId=simulated-device;SharedAccessKey=c2ltdWxhdGVk";

/// Twin diagnostic sampling simulator
///
/// Exercise the diagnostic sampling layer locally: apply desired-property
/// documents, send telemetry and see which messages were sampled.
#[derive(Parser, Debug)]
#[command(name = "twin-diag")]
#[command(about = "Twin diagnostic sampling simulator", long_about = None)]
#[command(version)]
pub struct TwinDiagCli {
    /// Output verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: TwinDiagCommands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum TwinDiagCommands {
    /// Run a device session against the in-memory transport
    Simulate(SimulateArgs),

    /// Resolve and validate the sampling configuration
    CheckConfig {
        #[command(flatten)]
        config: ConfigArgs,

        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Where the sampling configuration comes from
///
/// A config file replaces the environment; flags override either.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Configuration file (.json or .toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sampling authority: device, server or none
    #[arg(short, long)]
    pub authority: Option<SamplingAuthority>,

    /// Initial sampling rate percentage
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub rate: Option<u8>,

    /// Sampling strategy: random or continuous
    #[arg(short, long)]
    pub strategy: Option<SamplingStrategyKind>,

    /// Prefix of the environment variables read when no file is given
    #[arg(long, default_value = DEFAULT_ENV_PREFIX)]
    pub env_prefix: String,
}

impl ConfigArgs {
    /// Resolve the effective configuration and describe where it came from
    pub fn resolve(&self) -> Result<(DiagnosticConfig, String), DiagError> {
        let (mut config, mut source) = match &self.config {
            Some(path) => (
                DiagnosticConfig::from_file(path)?,
                format!("file {}", path.display()),
            ),
            None => (
                DiagnosticConfig::from_env_with_prefix(&self.env_prefix)?,
                format!("environment ({}_*)", self.env_prefix),
            ),
        };

        let mut overridden = false;
        if let Some(authority) = self.authority {
            config.authority = authority;
            overridden = true;
        }
        if let Some(rate) = self.rate {
            config.initial_rate_percentage = rate;
            overridden = true;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
            overridden = true;
        }
        if overridden {
            source.push_str(" with flag overrides");
        }

        config.validate()?;
        Ok((config, source))
    }
}

/// Arguments for `simulate`
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Device connection string
    #[arg(long, env = "TWIN_DIAG_CONNECTION_STRING", default_value = DEMO_CONNECTION_STRING, hide_env_values = true)]
    pub connection_string: String,

    /// Desired-property document to deliver, as JSON or @path (repeatable)
    #[arg(short, long = "desired")]
    pub desired: Vec<String>,

    /// Number of telemetry messages to send after the documents are applied
    #[arg(short = 'n', long, default_value_t = 10)]
    pub messages: u32,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

/// Execute the simulate command
pub fn execute_simulate(args: SimulateArgs) -> anyhow::Result<ExitCode> {
    let report = simulate(&args)?;
    report.render(args.format)?;
    Ok(ExitCode::Success)
}

/// Execute the check-config command
pub fn execute_check_config(config: ConfigArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let (resolved, source) = config.resolve()?;
    ConfigReport::new(&resolved, source).render(format)?;
    Ok(ExitCode::Success)
}

/// Run one simulated session and collect what happened
pub fn simulate(args: &SimulateArgs) -> anyhow::Result<SimulationReport> {
    let (config, _) = args.config.resolve()?;
    let client = DiagnosticDeviceClient::new(
        &args.connection_string,
        LoopbackTransport::new(),
        &config,
    )?;
    client.open()?;

    let forwarded: Arc<Mutex<Vec<ForwardedProperty>>> = Arc::new(Mutex::new(Vec::new()));
    let acks = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&forwarded);
    let ack_counter = Arc::clone(&acks);
    client.start_device_twin(
        Arc::new(move |status: StatusCode, _: &CallbackContext| {
            debug!(%status, "Twin acknowledgement");
            ack_counter.fetch_add(1, Ordering::Relaxed);
        }),
        None,
        Arc::new(move |key: &str, value: &TwinValue, _: &CallbackContext| {
            if let Ok(mut log) = sink.lock() {
                log.push(ForwardedProperty {
                    key: key.to_string(),
                    value: value.clone().into(),
                });
            }
        }),
        None,
    )?;

    for document in &args.desired {
        let text = load_document(document)?;
        let delivered = client
            .transport()
            .deliver_desired_json(&text)
            .with_context(|| format!("delivering desired document {}", document))?;
        debug!(delivered, "Delivered desired document");
    }

    for sequence in 0..args.messages {
        let body = serde_json::to_vec(&json!({
            "deviceId": client.identity().device_id,
            "sequence": sequence,
        }))?;
        client.send_event(
            Message::new(body).with_message_id(sequence.to_string()),
            None,
            None,
        )?;
    }

    let sampled = client
        .transport()
        .sent_messages()
        .iter()
        .filter(|m| m.diagnostic_envelope().is_some())
        .count();

    let policy = PolicyOutput::from_policy(client.policy(), client.decorator().strategy_name());
    client.close()?;

    info!(
        messages = args.messages,
        sampled,
        rate = policy.rate_percentage,
        "Simulation finished"
    );

    let forwarded = forwarded.lock().map(|f| f.clone()).unwrap_or_default();
    Ok(SimulationReport {
        device_id: client.identity().device_id.clone(),
        policy,
        forwarded,
        twin_acks: acks.load(Ordering::Relaxed),
        messages_sent: args.messages as usize,
        messages_sampled: sampled,
    })
}

fn load_document(argument: &str) -> anyhow::Result<String> {
    match argument.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(DiagError::from)
            .with_context(|| format!("reading desired document {}", path)),
        None => Ok(argument.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> TwinDiagCli {
        TwinDiagCli::try_parse_from(args).unwrap()
    }

    fn isolated(mut args: SimulateArgs) -> SimulateArgs {
        args.config.env_prefix = "TWIN_DIAG_CLI_TEST_UNSET".to_string();
        args
    }

    fn simulate_args(args: &[&str]) -> SimulateArgs {
        let mut argv = vec!["twin-diag", "simulate"];
        argv.extend_from_slice(args);
        match parse(&argv).command {
            TwinDiagCommands::Simulate(args) => isolated(args),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_simulate() {
        let args = simulate_args(&[
            "--authority",
            "client",
            "--rate",
            "20",
            "-d",
            r#"{"custom":"value"}"#,
            "-d",
            "@twin.json",
            "-n",
            "3",
            "--format",
            "json",
        ]);
        assert_eq!(args.config.authority, Some(SamplingAuthority::Device));
        assert_eq!(args.config.rate, Some(20));
        assert_eq!(args.desired.len(), 2);
        assert_eq!(args.messages, 3);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_rejects_out_of_range_rate() {
        assert!(TwinDiagCli::try_parse_from(["twin-diag", "simulate", "--rate", "101"]).is_err());
        assert!(
            TwinDiagCli::try_parse_from(["twin-diag", "check-config", "--authority", "cloud"])
                .is_err()
        );
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let args = simulate_args(&["--authority", "server", "--strategy", "continuous"]);
        let (config, source) = args.config.resolve().unwrap();
        assert_eq!(config.authority, SamplingAuthority::Server);
        assert_eq!(config.strategy, SamplingStrategyKind::Continuous);
        assert_eq!(config.initial_rate_percentage, 0);
        assert!(source.ends_with("with flag overrides"));
    }

    #[test]
    fn test_resolve_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diag.toml");
        std::fs::write(&path, "authority = \"device\"\ninitial_rate_percentage = 40\n").unwrap();

        let args = simulate_args(&["--config", path.to_str().unwrap()]);
        let (config, source) = args.config.resolve().unwrap();
        assert_eq!(config.authority, SamplingAuthority::Device);
        assert_eq!(config.initial_rate_percentage, 40);
        assert!(source.starts_with("file "));
    }

    #[test]
    fn test_simulate_server_controlled_session() {
        let args = simulate_args(&[
            "--authority",
            "server",
            "-d",
            r#"{"desired":{"diag_enable":"true","diag_sample_rate":"100","custom":"value","$version":2}}"#,
            "-n",
            "4",
        ]);

        let report = simulate(&args).unwrap();
        assert_eq!(report.device_id, "simulated-device");
        assert_eq!(report.policy.rate_percentage, 100);
        assert!(report.policy.enabled);
        assert_eq!(report.messages_sent, 4);
        assert_eq!(report.messages_sampled, 4);
        assert_eq!(report.forwarded.len(), 1);
        assert_eq!(report.forwarded[0].key, "custom");
        assert_eq!(report.forwarded[0].value, serde_json::json!("value"));
    }

    #[test]
    fn test_simulate_reads_document_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twin.json");
        std::fs::write(&path, r#"{"diag_enable":"true","diag_sample_rate":50}"#).unwrap();
        let document = format!("@{}", path.display());

        let args = simulate_args(&["--authority", "server", "-d", &document, "-n", "0"]);
        let report = simulate(&args).unwrap();
        assert_eq!(report.policy.rate_percentage, 50);
        assert_eq!(report.messages_sampled, 0);
    }

    #[test]
    fn test_simulate_bad_document_is_user_error() {
        let args = simulate_args(&["-d", "[1,2]"]);
        let err = simulate(&args).unwrap_err();
        assert!(err
            .downcast_ref::<DiagError>()
            .is_some_and(DiagError::is_user_error));

        let args = simulate_args(&["-d", "@/definitely/not/here.json"]);
        let err = simulate(&args).unwrap_err();
        assert!(matches!(err.downcast_ref::<DiagError>(), Some(DiagError::Io(_))));
    }
}
