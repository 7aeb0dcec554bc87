//! Output formatting for the simulator
//!
//! Reports render either as colored human-readable text or as pretty JSON.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};

use twin_diag_core::{DiagnosticConfig, SamplingPolicy};

/// Output format options for CLI results
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for machine processing
    Json,
}

/// Final state of the sampling policy
#[derive(Debug, Clone, Serialize)]
pub struct PolicyOutput {
    pub authority: String,
    pub rate_percentage: u8,
    pub enabled: bool,
    pub needs_sampling: bool,
    pub strategy: String,
}

impl PolicyOutput {
    pub fn from_policy(policy: &SamplingPolicy, strategy: &str) -> Self {
        let snapshot = policy.snapshot();
        Self {
            authority: policy.authority().to_string(),
            rate_percentage: snapshot.rate_percentage,
            enabled: snapshot.enabled,
            needs_sampling: snapshot.needs_sampling(),
            strategy: strategy.to_string(),
        }
    }
}

/// A desired property that reached the application handler
#[derive(Debug, Clone, Serialize)]
pub struct ForwardedProperty {
    pub key: String,
    pub value: serde_json::Value,
}

/// Outcome of a `simulate` run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub device_id: String,
    pub policy: PolicyOutput,
    pub forwarded: Vec<ForwardedProperty>,
    pub twin_acks: usize,
    pub messages_sent: usize,
    pub messages_sampled: usize,
}

impl SimulationReport {
    /// Render to stdout in the specified format
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        let mut stdout = io::stdout().lock();
        self.write_to(&mut stdout, format)?;
        stdout.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, out: &mut W, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => write_json(out, self),
            OutputFormat::Text => self.write_text(out),
        }
    }

    fn write_text<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        writeln!(out, "{}", "Simulation Results".cyan().bold())?;
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out, "Device:    {}", self.device_id)?;
        write_policy(out, &self.policy)?;
        writeln!(out)?;

        writeln!(out, "{}", "Telemetry:".cyan().bold())?;
        writeln!(out, "  Sent:    {}", self.messages_sent)?;
        writeln!(out, "  Sampled: {}", self.messages_sampled.to_string().green())?;
        writeln!(out, "  Twin acknowledgements: {}", self.twin_acks)?;
        writeln!(out)?;

        writeln!(out, "{}", "Forwarded properties:".cyan().bold())?;
        if self.forwarded.is_empty() {
            writeln!(out, "  {}", "(none)".dimmed())?;
        }
        for property in &self.forwarded {
            writeln!(out, "  {} = {}", property.key.yellow(), property.value)?;
        }
        Ok(())
    }
}

/// Resolved configuration for `check-config`
#[derive(Debug, Clone, Serialize)]
pub struct ConfigReport {
    pub source: String,
    pub authority: String,
    pub initial_rate_percentage: u8,
    pub strategy: String,
    pub initially_enabled: bool,
    pub needs_sampling: bool,
}

impl ConfigReport {
    pub fn new(config: &DiagnosticConfig, source: String) -> Self {
        let initially_enabled = config.authority.initially_enabled();
        Self {
            source,
            authority: config.authority.to_string(),
            initial_rate_percentage: config.initial_rate_percentage,
            strategy: config.strategy.to_string(),
            initially_enabled,
            needs_sampling: initially_enabled && config.initial_rate_percentage > 0,
        }
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<()> {
        let mut stdout = io::stdout().lock();
        self.write_to(&mut stdout, format)?;
        stdout.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, out: &mut W, format: OutputFormat) -> anyhow::Result<()> {
        match format {
            OutputFormat::Json => write_json(out, self),
            OutputFormat::Text => {
                writeln!(out, "{} {}", "+".green(), "Configuration is valid".bold())?;
                writeln!(out, "Source:    {}", self.source.dimmed())?;
                writeln!(out, "Authority: {}", self.authority)?;
                writeln!(out, "Rate:      {}%", self.initial_rate_percentage)?;
                writeln!(out, "Strategy:  {}", self.strategy)?;
                writeln!(out, "Enabled:   {}", self.initially_enabled)?;
                writeln!(out, "Sampling:  {}", on_off(self.needs_sampling))?;
                Ok(())
            }
        }
    }
}

fn write_policy<W: Write>(out: &mut W, policy: &PolicyOutput) -> anyhow::Result<()> {
    writeln!(out, "Authority: {}", policy.authority)?;
    writeln!(out, "Strategy:  {}", policy.strategy)?;
    writeln!(out, "Rate:      {}%", policy.rate_percentage)?;
    writeln!(out, "Enabled:   {}", policy.enabled)?;
    writeln!(out, "Sampling:  {}", on_off(policy.needs_sampling))?;
    Ok(())
}

fn on_off(value: bool) -> colored::ColoredString {
    if value {
        "on".green()
    } else {
        "off".red()
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
