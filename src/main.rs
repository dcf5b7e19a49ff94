//! gcs-link - command-line ground station link
//!
//! Usage:
//!   gcs-link ports [--watch]          List serial ports
//!   gcs-link params [--json]          Fetch all parameters
//!   gcs-link set NAME VALUE           Write one parameter
//!   gcs-link monitor                  Print live telemetry
//!   gcs-link reboot                   Reboot and wait for reconnect
//!
//! Transport comes from `gcs-link.toml`, `--port`/`--baud` or `--tcp`.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use gcs_link::config;
use gcs_link::transport::TransportConfig;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    gcs_link::logging::init_tracing(cli.verbose);

    let mut config = config::load(cli.config.as_deref());
    apply_overrides(&mut config, &cli);

    commands::run(cli.command, &config)
}

/// Command-line transport flags win over the config file
fn apply_overrides(config: &mut config::Config, cli: &cli::Cli) {
    if let Some(address) = &cli.tcp {
        config.transport = TransportConfig::Tcp {
            address: address.clone(),
        };
        return;
    }

    if cli.port.is_none() && cli.baud.is_none() {
        return;
    }
    let (current_port, current_baud) = match &config.transport {
        TransportConfig::Serial { port, baud_rate } => (port.clone(), *baud_rate),
        TransportConfig::Tcp { .. } => (String::new(), gcs_link::constants::DEFAULT_BAUD_RATE),
    };
    config.transport = TransportConfig::Serial {
        port: cli.port.clone().unwrap_or(current_port),
        baud_rate: cli.baud.unwrap_or(current_baud),
    };
}
