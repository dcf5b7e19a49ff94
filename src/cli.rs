//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use clap::{Parser, Subcommand};
use gcs_link::codec::ParamType;
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Ground-control link to a MAVLink flight controller
#[derive(Parser, Debug)]
#[command(name = "gcs-link")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ./gcs-link.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Serial port to use (overrides config)
    #[arg(long, value_name = "PORT", global = true, conflicts_with = "tcp")]
    pub port: Option<String>,

    /// Serial baud rate (overrides config)
    #[arg(long, value_name = "BAUD", global = true)]
    pub baud: Option<u32>,

    /// Connect over TCP instead of serial (e.g. 127.0.0.1:5760)
    #[arg(long, value_name = "ADDR", global = true)]
    pub tcp: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports
    Ports {
        /// Keep running and report plug/unplug events
        #[arg(long)]
        watch: bool,
    },

    /// Fetch and print every parameter
    Params {
        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Request attempts (overrides config)
        #[arg(long, value_name = "N")]
        attempts: Option<u32>,

        /// Listening window per attempt in milliseconds (overrides config)
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Write one parameter
    Set {
        /// Parameter name (max 16 characters)
        name: String,

        /// New value
        #[arg(allow_negative_numbers = true)]
        value: f32,

        /// Value type: uint8, int8, uint16, int16, uint32, int32, real32, ...
        #[arg(long = "type", value_name = "TYPE", default_value = "real32")]
        param_type: ParamType,

        /// Wait for the device to echo the new value
        #[arg(long)]
        confirm: bool,

        /// Commit parameters to non-volatile storage afterwards
        #[arg(long)]
        persist: bool,

        /// Reboot the device afterwards
        #[arg(long)]
        reboot: bool,
    },

    /// Print live telemetry until Ctrl-C
    Monitor,

    /// Reboot the device and wait for it to come back
    Reboot {
        /// Return right after sending the command
        #[arg(long)]
        no_wait: bool,
    },

    /// Spin one motor briefly
    MotorTest {
        /// Motor number (1-based)
        motor: u8,

        /// Throttle in percent, clamped to 0..=100
        throttle: f32,
    },

    /// Restore default parameters on the device
    ResetParams,
}

// =============================================================================
// Tests
// =============================================================================
