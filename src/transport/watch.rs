//! Serial port hot-plug watcher
//!
//! Polls the OS port list on a `PeriodicTask` and reports changes. The link
//! itself never enumerates; a caller uses this to decide what to connect to.

use super::serial::{PortInfo, SerialTransport};
use crate::error::Result;
use crate::periodic::PeriodicTask;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

/// Background serial enumeration; stops when dropped
pub struct PortWatcher {
    task: PeriodicTask,
}

impl PortWatcher {
    /// Watch the system port list
    ///
    /// `on_change` is called with the initial list and then with every
    /// differing list.
    pub fn spawn<F>(interval: Duration, on_change: F) -> Result<Self>
    where
        F: FnMut(&[PortInfo]) + Send + 'static,
    {
        Self::spawn_with(interval, SerialTransport::available_ports, on_change)
    }

    /// Watch a custom port source
    pub fn spawn_with<S, F>(interval: Duration, mut source: S, mut on_change: F) -> Result<Self>
    where
        S: FnMut() -> Vec<PortInfo> + Send + 'static,
        F: FnMut(&[PortInfo]) + Send + 'static,
    {
        let mut last: Option<Vec<PortInfo>> = None;
        let task = PeriodicTask::spawn("port-watch", interval, move || {
            let ports = source();
            if last.as_ref() != Some(&ports) {
                debug!("Serial ports changed: {} present", ports.len());
                on_change(&ports);
                last = Some(ports);
            }
            ControlFlow::Continue(())
        })?;
        Ok(Self { task })
    }

    pub fn stop(&mut self) {
        self.task.stop();
    }
}
