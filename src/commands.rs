//! Subcommand implementations
//!
//! Each command opens its own link from the resolved config, runs, and
//! disconnects. Results go to stdout, progress to stderr.

use crate::cli::Command;
use anyhow::{bail, Context, Result};
use gcs_link::codec::{Message, MessageKind, MavlinkCodec, ParamType};
use gcs_link::config::Config;
use gcs_link::constants::{PORT_WATCH_INTERVAL_MS, STATS_REPORT_INTERVAL_MS};
use gcs_link::link::{
    FetchOptions, FetchStatus, Instrumentation, Link, ParameterFetch, PendingParameters,
    RebootHandle,
};
use gcs_link::periodic::PeriodicTask;
use gcs_link::transport::serial::PortInfo;
use gcs_link::transport::{PortWatcher, SerialTransport};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

type MavLink = Link<MavlinkCodec>;

pub fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::Ports { watch } => ports(watch),
        Command::Params {
            json,
            attempts,
            timeout_ms,
        } => params(config, json, attempts, timeout_ms),
        Command::Set {
            name,
            value,
            param_type,
            confirm,
            persist,
            reboot,
        } => set(config, &name, value, param_type, confirm, persist, reboot),
        Command::Monitor => monitor(config),
        Command::Reboot { no_wait } => reboot(config, no_wait),
        Command::MotorTest { motor, throttle } => with_link(config, |link| {
            link.motor_test(motor, throttle)?;
            eprintln!("Motor {} test sent", motor);
            Ok(())
        }),
        Command::ResetParams => with_link(config, |link| {
            link.reset_parameters()?;
            eprintln!("Parameter reset sent");
            Ok(())
        }),
    }
}

// =============================================================================
// Link helpers
// =============================================================================

fn open_link(config: &Config) -> Result<MavLink> {
    let transport = config.transport.build().context("Cannot select transport")?;
    let endpoint = transport.describe();
    let link = Link::with_instrumentation(
        config.protocol.codec(),
        config.link.to_link_config(),
        Instrumentation::new(&endpoint),
    );

    eprintln!("Connecting to {}...", endpoint);
    if !link.connect(transport) {
        bail!("Cannot connect to {}", endpoint);
    }
    Ok(link)
}

fn with_link(config: &Config, body: impl FnOnce(&MavLink) -> Result<()>) -> Result<()> {
    let link = open_link(config)?;
    let result = body(&link);
    link.disconnect();
    result
}

/// Block the calling thread until Ctrl-C
fn wait_for_ctrl_c() -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

fn print_ports(ports: &[PortInfo]) {
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        match (&port.usb_id, &port.product) {
            (Some((vid, pid)), Some(product)) => {
                println!("{:<24} {:04x}:{:04x} {}", port.name, vid, pid, product)
            }
            (Some((vid, pid)), None) => println!("{:<24} {:04x}:{:04x}", port.name, vid, pid),
            _ => println!("{}", port.name),
        }
    }
}

fn ports(watch: bool) -> Result<()> {
    if !watch {
        print_ports(&SerialTransport::available_ports());
        return Ok(());
    }

    let mut watcher = PortWatcher::spawn(Duration::from_millis(PORT_WATCH_INTERVAL_MS), |ports| {
        println!("--");
        print_ports(ports);
    })?;
    wait_for_ctrl_c()?;
    watcher.stop();
    Ok(())
}

fn params(config: &Config, json: bool, attempts: Option<u32>, timeout_ms: Option<u64>) -> Result<()> {
    let mut options = config.link.fetch_options();
    if let Some(attempts) = attempts {
        options.max_attempts = attempts.max(1);
    }
    if let Some(ms) = timeout_ms {
        options.receive_timeout = Duration::from_millis(ms);
    }

    let fetch = with_fetch(config, options)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&fetch.parameters)?);
    } else {
        for param in fetch.parameters.values() {
            println!("{:<16} {:>14} {}", param.name, param.value, param.param_type);
        }
    }

    match fetch.status {
        FetchStatus::Satisfied => {
            eprintln!("{} parameter(s) in {} attempt(s)", fetch.parameters.len(), fetch.attempts)
        }
        FetchStatus::TimedOut => eprintln!("No response after {} attempt(s)", fetch.attempts),
        FetchStatus::Disconnected => bail!("Link lost during parameter fetch"),
    }
    Ok(())
}

fn with_fetch(config: &Config, options: FetchOptions) -> Result<ParameterFetch> {
    let link = open_link(config)?;
    let fetch = link.get_parameters(options);
    link.disconnect();
    Ok(fetch)
}

#[allow(clippy::too_many_arguments)]
fn set(
    config: &Config,
    name: &str,
    value: f32,
    param_type: ParamType,
    confirm: bool,
    persist: bool,
    reboot: bool,
) -> Result<()> {
    let link = open_link(config)?;
    let result = (|| -> Result<()> {
        if confirm {
            let timeout = config.link.to_link_config().param_receive_timeout;
            match link.set_parameter_confirmed(name, value, param_type, timeout)? {
                Some(param) => println!("{} = {}", param.name, param.value),
                None => bail!("{} was not confirmed within {:?}", name, timeout),
            }
        } else {
            let mut pending = PendingParameters::new();
            pending.insert(name, value, param_type);
            link.set_parameters(&pending)?;
            eprintln!("{} set to {}", name, value);
        }

        if persist {
            link.write_to_storage(|| eprintln!("Storage write requested"))?;
        }
        if reboot {
            let handle = link.reboot()?;
            report_reboot(handle.wait())?;
        }
        Ok(())
    })();
    link.disconnect();
    result
}

fn monitor(config: &Config) -> Result<()> {
    let link = open_link(config)?;

    link.add_listener(MessageKind::Heartbeat, |msg| {
        if let Message::Heartbeat(hb) = msg {
            println!(
                "HEARTBEAT sys={} comp={} mode={}",
                hb.system_id, hb.component_id, hb.custom_mode
            );
        }
    });
    link.add_listener(MessageKind::Attitude, |msg| {
        if let Message::Attitude(att) = msg {
            println!(
                "ATTITUDE roll={:+.1} pitch={:+.1} yaw={:+.1}",
                att.roll.to_degrees(),
                att.pitch.to_degrees(),
                att.yaw.to_degrees()
            );
        }
    });
    link.add_listener(MessageKind::RcChannels, |msg| {
        if let Message::RcChannels(rc) = msg {
            let count = usize::from(rc.channel_count).min(rc.channels.len());
            println!("RC {:?} rssi={}", &rc.channels[..count], rc.rssi);
        }
    });
    link.on_disconnect(|| eprintln!("Link lost"));

    let stats = Arc::clone(link.stats());
    let reporter = PeriodicTask::spawn(
        "stats-report",
        Duration::from_millis(STATS_REPORT_INTERVAL_MS),
        move || {
            let (tx, rx) = stats.update_rates();
            let snapshot = stats.snapshot();
            eprintln!(
                "tx {:.2} KB/s  rx {:.2} KB/s  msgs {}  corrupt {}",
                tx, rx, snapshot.messages_decoded, snapshot.corrupt_frames
            );
            ControlFlow::Continue(())
        },
    )?;

    wait_for_ctrl_c()?;
    drop(reporter);
    link.disconnect();
    Ok(())
}

fn reboot(config: &Config, no_wait: bool) -> Result<()> {
    let link = open_link(config)?;
    let handle = link.reboot()?;
    if no_wait {
        detach_reboot(&link, &handle);
        eprintln!("Reboot command sent");
        return Ok(());
    }

    let reconnected = handle.wait();
    link.disconnect();
    report_reboot(reconnected)
}

/// Stop following a reboot once its command has had time to leave the wire
fn detach_reboot(link: &MavLink, handle: &RebootHandle) {
    std::thread::sleep(link.config().reboot_settle);
    handle.cancel();
    link.disconnect();
}

fn report_reboot(reconnected: bool) -> Result<()> {
    if reconnected {
        eprintln!("Device rebooted and reconnected");
        Ok(())
    } else {
        bail!("Device did not come back after reboot")
    }
}
