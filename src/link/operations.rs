//! Compound operations built from send + listen + timeout
//!
//! Each operation follows the same shape:
//!
//! ```text
//! Idle -> Sent -> AwaitingResponses(deadline) -> Satisfied | TimedOut
//!                      ^                              |
//!                      +------ retry (budget left) ---+
//! ```
//!
//! Temporary listeners are held by a `ListenerGuard`, so they are removed on
//! every exit path. Disconnecting wakes every wait, so nothing outlives the
//! link it runs on.

use super::completion::Completion;
use super::{DisconnectReason, Link, LinkConfig};
use crate::codec::{Codec, Command, CommandCode, Message, MessageKind, ParamType, Parameter};
use crate::constants::{
    MOTOR_TEST_THROTTLE_PERCENT, MOTOR_TEST_TIMEOUT_SECS, REBOOT_AUTOPILOT,
    STORAGE_RESET_DEFAULTS, STORAGE_WRITE_PERSISTENT,
};
use crate::error::{LinkError, Result};
use crate::periodic::StopSignal;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// =============================================================================
// Parameter fetch
// =============================================================================

/// Parameters keyed by name
pub type ParameterMap = BTreeMap<String, Parameter>;

/// Retry budget of a parameter fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Request attempts, at least one is always made
    pub max_attempts: u32,
    /// Listening window after each request
    pub receive_timeout: Duration,
    /// Extra pause between attempts
    pub retry_delay: Duration,
}

impl From<&LinkConfig> for FetchOptions {
    fn from(config: &LinkConfig) -> Self {
        Self {
            max_attempts: config.param_max_attempts,
            receive_timeout: config.param_receive_timeout,
            retry_delay: config.param_retry_delay,
        }
    }
}

/// How a fetch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// At least one parameter arrived
    Satisfied,
    /// Every attempt timed out without a response
    TimedOut,
    /// The link went down before the budget was used
    Disconnected,
}

/// Outcome of a fetch; never an error, possibly empty
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFetch {
    pub parameters: ParameterMap,
    /// Requests actually sent
    pub attempts: u32,
    pub status: FetchStatus,
}

// =============================================================================
// Parameter set
// =============================================================================

/// Batch of parameter writes accumulated by a caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingParameters(BTreeMap<String, (f32, ParamType)>);

impl PendingParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write; a later value for the same name replaces the earlier one
    pub fn insert(&mut self, name: impl Into<String>, value: f32, param_type: ParamType) {
        self.0.insert(name.into(), (value, param_type));
    }

    pub fn remove(&mut self, name: &str) -> Option<(f32, ParamType)> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32, ParamType)> {
        self.0.iter().map(|(name, (value, t))| (name.as_str(), *value, *t))
    }
}

// =============================================================================
// Reboot
// =============================================================================

/// Ephemeral state of one reboot-and-reconnect run
pub(crate) struct RebootSequence {
    cancel: StopSignal,
    done: Completion<bool>,
    deadline: Mutex<Option<Instant>>,
}

impl RebootSequence {
    fn new() -> Self {
        Self {
            cancel: StopSignal::new(),
            done: Completion::new(),
            deadline: Mutex::new(None),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.stop();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.done.is_complete()
    }
}

/// Caller's view of a running reboot
#[derive(Clone)]
pub struct RebootHandle {
    sequence: Arc<RebootSequence>,
}

impl RebootHandle {
    /// Block until the sequence resolves; true if the link reconnected
    pub fn wait(&self) -> bool {
        self.sequence.done.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        self.sequence.done.wait_timeout(timeout)
    }

    pub fn is_finished(&self) -> bool {
        self.sequence.is_finished()
    }

    /// Reconnect deadline, once the transport has been closed
    pub fn deadline(&self) -> Option<Instant> {
        *self.sequence.deadline.lock()
    }

    /// Stop reconnecting; the sequence resolves as failed
    pub fn cancel(&self) {
        self.sequence.cancel();
    }
}

// =============================================================================
// Operations
// =============================================================================

impl<C: Codec + 'static> Link<C> {
    /// Fetch every parameter, retrying while nothing arrives
    ///
    /// Blocks for at most `max_attempts` receive windows plus the retry
    /// delays. The same name arriving twice keeps the later value.
    pub fn get_parameters(&self, options: FetchOptions) -> ParameterFetch {
        let _enter = self.shared.instrumentation.span.enter();
        let collected = Arc::new(Mutex::new(ParameterMap::new()));

        let sink = Arc::clone(&collected);
        let guard = self.listen(MessageKind::ParamValue, move |msg| {
            if let Message::ParamValue(param) = msg {
                sink.lock().insert(param.name.clone(), param.clone());
            }
        });

        let mut attempts = 0;
        let mut status = FetchStatus::TimedOut;
        for attempt in 0..options.max_attempts.max(1) {
            if attempt > 0
                && !options.retry_delay.is_zero()
                && !self.wait_while_connected(Instant::now() + options.retry_delay)
            {
                status = FetchStatus::Disconnected;
                break;
            }

            if let Err(e) = self.send_command(&Command::RequestParameterList) {
                debug!("Parameter request failed: {}", e);
                status = FetchStatus::Disconnected;
                break;
            }
            attempts += 1;

            let connected = self.wait_while_connected(Instant::now() + options.receive_timeout);
            if !collected.lock().is_empty() {
                status = FetchStatus::Satisfied;
                break;
            }
            if !connected {
                status = FetchStatus::Disconnected;
                break;
            }
            debug!("No parameters after attempt {}/{}", attempt + 1, options.max_attempts);
        }
        drop(guard);

        let parameters = std::mem::take(&mut *collected.lock());
        info!(
            "Fetched {} parameter(s) in {} attempt(s) ({:?})",
            parameters.len(),
            attempts,
            status
        );
        ParameterFetch {
            parameters,
            attempts,
            status,
        }
    }

    /// Fetch on a worker thread, then call `on_complete` there
    pub fn spawn_get_parameters<F>(&self, options: FetchOptions, on_complete: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(ParameterFetch) + Send + 'static,
    {
        let link = self.clone();
        thread::Builder::new()
            .name("link-fetch".into())
            .spawn(move || on_complete(link.get_parameters(options)))
            .map_err(|e| LinkError::Spawn { source: e })
    }

    /// Send one parameter write; no acknowledgment is awaited
    pub fn set_parameter(&self, name: &str, value: f32, param_type: ParamType) -> Result<()> {
        self.send_command(&Command::SetParameter {
            name: name.to_string(),
            value,
            param_type,
        })
    }

    /// Send a batch of writes, flush once, then wait the settle delay
    ///
    /// Best effort: success means every write left the host, not that the
    /// device applied it. Returns the number of writes sent.
    pub fn set_parameters(&self, pending: &PendingParameters) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        for (name, value, param_type) in pending.iter() {
            self.set_parameter(name, value, param_type)?;
        }
        self.flush()?;

        if !self.wait_while_connected(Instant::now() + self.shared.config.param_set_settle) {
            return Err(LinkError::NotConnected);
        }
        info!("Sent {} parameter write(s)", pending.len());
        Ok(pending.len())
    }

    /// `set_parameters` on a worker thread
    pub fn spawn_set_parameters<F>(&self, pending: PendingParameters, on_complete: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(Result<usize>) + Send + 'static,
    {
        let link = self.clone();
        thread::Builder::new()
            .name("link-set".into())
            .spawn(move || on_complete(link.set_parameters(&pending)))
            .map_err(|e| LinkError::Spawn { source: e })
    }

    /// Write one parameter and wait for the device to echo it back
    ///
    /// Returns the echoed value, or `None` if no echo arrived in time.
    pub fn set_parameter_confirmed(
        &self,
        name: &str,
        value: f32,
        param_type: ParamType,
        timeout: Duration,
    ) -> Result<Option<Parameter>> {
        let echo = Arc::new(Completion::new());

        let signal = Arc::clone(&echo);
        let wanted = name.to_string();
        let _guard = self.listen(MessageKind::ParamValue, move |msg| {
            if let Message::ParamValue(param) = msg {
                if param.name == wanted {
                    signal.complete(param.clone());
                }
            }
        });

        self.set_parameter(name, value, param_type)?;
        self.flush()?;

        let deadline = Instant::now() + timeout;
        while !echo.is_complete() && Instant::now() < deadline && self.is_connected() {
            let slice = deadline
                .saturating_duration_since(Instant::now())
                .min(self.shared.config.dispatch_poll);
            if echo.wait_timeout(slice).is_some() {
                break;
            }
        }

        let confirmed = echo.get();
        match &confirmed {
            Some(param) if param.value != value => {
                warn!("{} echoed {} instead of {}", name, param.value, value)
            }
            Some(_) => debug!("{} confirmed", name),
            None => warn!("No echo for {}", name),
        }
        Ok(confirmed)
    }

    /// Ask the device to commit parameters to non-volatile storage
    ///
    /// Fire-and-forget: `on_complete` runs right after the send.
    pub fn write_to_storage(&self, on_complete: impl FnOnce()) -> Result<()> {
        self.send_command(&Command::long(
            CommandCode::PreflightStorage,
            &[STORAGE_WRITE_PERSISTENT],
        ))?;
        on_complete();
        Ok(())
    }

    /// Ask the device to restore default parameters
    pub fn reset_parameters(&self) -> Result<()> {
        self.send_command(&Command::long(
            CommandCode::PreflightStorage,
            &[STORAGE_RESET_DEFAULTS],
        ))
    }

    /// Spin one motor at `throttle` percent (clamped to 0..=100) briefly
    pub fn motor_test(&self, motor: u8, throttle: f32) -> Result<()> {
        let throttle = if throttle.is_nan() {
            0.0
        } else {
            throttle.clamp(0.0, 100.0)
        };
        self.send_command(&Command::long(
            CommandCode::DoMotorTest,
            &[
                f32::from(motor),
                MOTOR_TEST_THROTTLE_PERCENT,
                throttle,
                MOTOR_TEST_TIMEOUT_SECS,
                1.0,
                0.0,
            ],
        ))
    }

    pub fn arm(&self, armed: bool) -> Result<()> {
        self.send_command(&Command::long(
            CommandCode::ComponentArmDisarm,
            &[if armed { 1.0 } else { 0.0 }],
        ))
    }

    /// Reboot the device and reconnect once it is back
    pub fn reboot(&self) -> Result<RebootHandle> {
        self.reboot_with(|_| {})
    }

    /// Reboot, calling `on_complete(reconnected)` when the sequence resolves
    ///
    /// After the command is flushed, a worker waits the settle delay, closes
    /// the transport, and polls `reconnect` until the device reappears or the
    /// reconnect window elapses. Open errors during the window are expected.
    pub fn reboot_with<F>(&self, on_complete: F) -> Result<RebootHandle>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let sequence = {
            let mut slot = self.shared.reboot.lock();
            if slot.as_ref().is_some_and(|s| !s.is_finished()) {
                return Err(LinkError::RebootInProgress);
            }
            let sequence = Arc::new(RebootSequence::new());
            *slot = Some(Arc::clone(&sequence));
            sequence
        };

        let sent = self
            .send_command(&Command::long(
                CommandCode::PreflightRebootShutdown,
                &[REBOOT_AUTOPILOT],
            ))
            .and_then(|()| self.flush());
        if let Err(e) = sent {
            sequence.done.complete(false);
            return Err(e);
        }

        let link = self.clone();
        let worker_sequence = Arc::clone(&sequence);
        let spawned = thread::Builder::new()
            .name("link-reboot".into())
            .spawn(move || {
                let reconnected = link.run_reboot_sequence(&worker_sequence);
                worker_sequence.done.complete(reconnected);
                on_complete(reconnected);
            });

        if let Err(e) = spawned {
            sequence.done.complete(false);
            return Err(LinkError::Spawn { source: e });
        }
        Ok(RebootHandle { sequence })
    }

    /// Block until the last reboot resolves
    ///
    /// `None` if no reboot was started or it is still running at the timeout.
    pub fn wait_for_reboot(&self, timeout: Duration) -> Option<bool> {
        let sequence = self.shared.reboot.lock().clone()?;
        sequence.done.wait_timeout(timeout)
    }

    fn run_reboot_sequence(&self, sequence: &RebootSequence) -> bool {
        let _enter = self.shared.instrumentation.span.enter();
        let config = &self.shared.config;

        // Let the command physically leave the wire
        if sequence.cancel.wait_timeout(config.reboot_settle) {
            return false;
        }
        self.shared.teardown(DisconnectReason::Reboot);

        let deadline = Instant::now() + config.reboot_reconnect_timeout;
        *sequence.deadline.lock() = Some(deadline);
        if sequence.cancel.wait_timeout(config.reboot_reconnect_settle) {
            return false;
        }

        loop {
            if self.shared.reconnect(Some(&sequence.cancel)) || self.is_connected() {
                info!("Reconnected after reboot");
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            let pause = config
                .reboot_poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            if sequence.cancel.wait_timeout(pause) {
                return false;
            }
        }

        warn!(
            "Device did not come back within {:?}",
            config.reboot_reconnect_timeout
        );
        false
    }
}
