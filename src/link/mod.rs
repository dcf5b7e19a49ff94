//! Link session manager
//!
//! A `Link` owns one transport at a time and the two workers that service it:
//!
//! ```text
//! Transport --read--> [receive] --decode--> queue --> [dispatch] --> listeners
//!     ^                                                                  |
//!     +------------------ send_command (caller threads) <----------------+
//! ```
//!
//! State moves Disconnected -> Connecting -> Connected and back to
//! Disconnected on request, on transport loss, or on reboot. Workers are
//! stopped and joined before the transport is closed, so no worker ever
//! touches a closed handle.
//!
//! Compound operations (parameter fetch/set, reboot) live in `operations`.

pub mod completion;
mod operations;
pub mod registry;
pub mod stats;
mod worker;

pub use completion::Completion;
pub use operations::{
    FetchOptions, FetchStatus, ParameterFetch, ParameterMap, PendingParameters, RebootHandle,
};
pub use registry::{Listener, ListenerId, ListenerRegistry};
pub use stats::{Stats, StatsSnapshot};

use crate::codec::{Codec, Command, Message, MessageKind};
use crate::constants::*;
use crate::error::{LinkError, Result};
use crate::periodic::StopSignal;
use crate::transport::Transport;
use operations::RebootSequence;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Span};
use worker::{DispatchWorker, ReceiveWorker};

// =============================================================================
// Configuration
// =============================================================================

/// Timing of a link and its compound operations
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Transport read timeout in the receive loop
    pub read_timeout: Duration,
    /// Bounded wait of the dispatch loop on the queue
    pub dispatch_poll: Duration,
    pub param_receive_timeout: Duration,
    pub param_max_attempts: u32,
    pub param_retry_delay: Duration,
    pub param_set_settle: Duration,
    pub reboot_settle: Duration,
    pub reboot_reconnect_settle: Duration,
    pub reboot_reconnect_timeout: Duration,
    pub reboot_poll_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            dispatch_poll: Duration::from_millis(DEFAULT_DISPATCH_POLL_MS),
            param_receive_timeout: Duration::from_millis(DEFAULT_PARAM_RECEIVE_TIMEOUT_MS),
            param_max_attempts: DEFAULT_PARAM_MAX_ATTEMPTS,
            param_retry_delay: Duration::from_millis(DEFAULT_PARAM_RETRY_DELAY_MS),
            param_set_settle: Duration::from_millis(DEFAULT_PARAM_SET_SETTLE_MS),
            reboot_settle: Duration::from_millis(DEFAULT_REBOOT_SETTLE_MS),
            reboot_reconnect_settle: Duration::from_millis(DEFAULT_REBOOT_RECONNECT_SETTLE_MS),
            reboot_reconnect_timeout: Duration::from_millis(DEFAULT_REBOOT_RECONNECT_TIMEOUT_MS),
            reboot_poll_interval: Duration::from_millis(DEFAULT_REBOOT_POLL_INTERVAL_MS),
        }
    }
}

/// Observability handle injected into a link
///
/// Every worker enters `span`, so log lines carry the link's name. `stats`
/// may be shared with a reporter thread.
#[derive(Clone)]
pub struct Instrumentation {
    pub span: Span,
    pub stats: Arc<Stats>,
}

impl Instrumentation {
    pub fn new(name: &str) -> Self {
        Self {
            span: info_span!("link", name = %name),
            stats: Arc::new(Stats::new()),
        }
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::new("link")
    }
}

// =============================================================================
// State
// =============================================================================

/// Public connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Internal phase; `Disconnecting` covers worker shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Write-path lifecycle since the last connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxPhase {
    /// Next write flushes stale output first
    AwaitingFirstWrite,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisconnectReason {
    Requested,
    TransportLost,
    Reboot,
}

type Callback = Arc<dyn Fn() + Send + Sync>;

struct Workers {
    running: Arc<AtomicBool>,
    receiver: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

pub(crate) struct Shared<C: Codec + 'static> {
    config: LinkConfig,
    phase: Mutex<Phase>,
    phase_changed: Condvar,
    /// Last transport handed to `connect`; open only while connected
    transport: Mutex<Option<Arc<dyn Transport>>>,
    codec: Mutex<C>,
    listeners: Arc<ListenerRegistry>,
    workers: Mutex<Option<Workers>>,
    on_connect: RwLock<Option<Callback>>,
    on_disconnect: RwLock<Option<Callback>>,
    tx_phase: Mutex<TxPhase>,
    reboot: Mutex<Option<Arc<RebootSequence>>>,
    instrumentation: Instrumentation,
}

/// Session manager for one physical link
///
/// Cheap to clone; clones share the same session.
pub struct Link<C: Codec + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: Codec + 'static> Clone for Link<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Codec + 'static> Link<C> {
    pub fn new(codec: C, config: LinkConfig) -> Self {
        Self::with_instrumentation(codec, config, Instrumentation::default())
    }

    pub fn with_instrumentation(codec: C, config: LinkConfig, instrumentation: Instrumentation) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                phase: Mutex::new(Phase::Disconnected),
                phase_changed: Condvar::new(),
                transport: Mutex::new(None),
                codec: Mutex::new(codec),
                listeners: Arc::new(ListenerRegistry::new()),
                workers: Mutex::new(None),
                on_connect: RwLock::new(None),
                on_disconnect: RwLock::new(None),
                tx_phase: Mutex::new(TxPhase::AwaitingFirstWrite),
                reboot: Mutex::new(None),
                instrumentation,
            }),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.shared.instrumentation.stats
    }

    /// Called after every successful connect
    pub fn on_connect(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_connect.write() = Some(Arc::new(callback));
    }

    /// Called once per transition out of Connected
    pub fn on_disconnect(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.shared.on_disconnect.write() = Some(Arc::new(callback));
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open `transport` and start the workers
    ///
    /// Returns false if the link is not disconnected or the transport cannot
    /// be opened. A failed open is a normal outcome and is only logged.
    pub fn connect(&self, transport: Arc<dyn Transport>) -> bool {
        self.shared.connect(transport, None)
    }

    /// Connect again with the last transport given to `connect`
    pub fn reconnect(&self) -> bool {
        self.shared.reconnect(None)
    }

    /// Stop the workers and close the transport
    ///
    /// Also cancels a reboot sequence in progress. Returns true if the link
    /// was connected or a reboot was cancelled.
    pub fn disconnect(&self) -> bool {
        let cancelled = match self.shared.reboot.lock().as_ref() {
            Some(sequence) if !sequence.is_finished() => {
                sequence.cancel();
                true
            }
            _ => false,
        };
        self.shared.teardown(DisconnectReason::Requested) || cancelled
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn state(&self) -> LinkState {
        match *self.shared.phase.lock() {
            Phase::Connecting => LinkState::Connecting,
            Phase::Connected => LinkState::Connected,
            Phase::Disconnected | Phase::Disconnecting => LinkState::Disconnected,
        }
    }

    /// Sleep until `deadline` unless the link leaves Connected first
    ///
    /// Returns true if still connected at the deadline.
    pub(crate) fn wait_while_connected(&self, deadline: Instant) -> bool {
        let mut phase = self.shared.phase.lock();
        while *phase == Phase::Connected {
            if self
                .shared
                .phase_changed
                .wait_until(&mut phase, deadline)
                .timed_out()
            {
                break;
            }
        }
        *phase == Phase::Connected
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Register a listener for every message of `kind`
    ///
    /// Listeners run on the dispatch thread in registration order. They may
    /// add or remove listeners and send commands, but must not block on a
    /// compound operation of the same link.
    pub fn add_listener<F>(&self, kind: MessageKind, listener: F) -> ListenerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.listeners.add(kind, Arc::new(listener))
    }

    pub fn remove_listener(&self, kind: MessageKind, id: ListenerId) -> bool {
        self.shared.listeners.remove(kind, id)
    }

    /// Register a listener removed when the guard drops
    pub fn listen<F>(&self, kind: MessageKind, listener: F) -> ListenerGuard
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = self.add_listener(kind, listener);
        ListenerGuard {
            registry: Arc::clone(&self.shared.listeners),
            kind,
            id,
        }
    }

    /// Listeners currently registered across all kinds
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Encode and write one command; no acknowledgment is awaited
    ///
    /// A write failure is treated as transport loss: the link disconnects and
    /// the error is returned.
    pub fn send_command(&self, command: &Command) -> Result<()> {
        self.shared.send(command)
    }

    /// Push buffered output onto the wire
    pub fn flush(&self) -> Result<()> {
        match self.shared.current_transport() {
            Some(transport) => transport.flush(),
            None => Err(LinkError::NotConnected),
        }
    }
}

/// Removes its listener when dropped
pub struct ListenerGuard {
    registry: Arc<ListenerRegistry>,
    kind: MessageKind,
    id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.registry.remove(self.kind, self.id);
    }
}

// =============================================================================
// Shared internals
// =============================================================================

impl<C: Codec + 'static> Shared<C> {
    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        if *self.phase.lock() != Phase::Connected {
            return None;
        }
        self.transport.lock().clone()
    }

    fn set_phase(&self, next: Phase) {
        *self.phase.lock() = next;
        self.phase_changed.notify_all();
    }

    /// Connect unless `cancel` is already signalled
    fn connect(self: &Arc<Self>, transport: Arc<dyn Transport>, cancel: Option<&StopSignal>) -> bool {
        let _enter = self.instrumentation.span.enter();
        {
            let mut phase = self.phase.lock();
            if cancel.is_some_and(StopSignal::is_stopped) {
                return false;
            }
            if *phase != Phase::Disconnected {
                debug!("Connect rejected: link is {:?}", *phase);
                return false;
            }
            *phase = Phase::Connecting;
            self.phase_changed.notify_all();
        }
        let previous = self.transport.lock().replace(Arc::clone(&transport));

        match transport.connect() {
            Ok(true) => {}
            Ok(false) => {
                // Someone else owns the open handle; keep the last transport we owned
                warn!("{} is already open elsewhere", transport.describe());
                *self.transport.lock() = previous;
                self.set_phase(Phase::Disconnected);
                return false;
            }
            Err(e) => {
                debug!("Cannot open {}: {}", transport.describe(), e);
                self.set_phase(Phase::Disconnected);
                return false;
            }
        }
        transport.set_timeout(self.config.read_timeout);
        self.codec.lock().reset();
        *self.tx_phase.lock() = TxPhase::AwaitingFirstWrite;

        {
            // Held until Connected so a concurrent teardown finds the workers
            let mut workers = self.workers.lock();
            match self.spawn_workers(&transport) {
                Ok(spawned) => {
                    *workers = Some(spawned);
                    self.set_phase(Phase::Connected);
                }
                Err(e) => {
                    warn!("{}", e);
                    drop(workers);
                    self.set_phase(Phase::Disconnected);
                    transport.disconnect();
                    return false;
                }
            }
        }

        info!("Connected ({})", transport.describe());
        let callback = self.on_connect.read().clone();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    fn reconnect(self: &Arc<Self>, cancel: Option<&StopSignal>) -> bool {
        let transport = self.transport.lock().clone();
        match transport {
            Some(transport) => self.connect(transport, cancel),
            None => false,
        }
    }

    fn spawn_workers(self: &Arc<Self>, transport: &Arc<dyn Transport>) -> Result<Workers> {
        let running = Arc::new(AtomicBool::new(true));
        let (queue_tx, queue_rx) = mpsc::channel();
        let span = self.instrumentation.span.clone();
        let stats = Arc::clone(&self.instrumentation.stats);

        let receive = ReceiveWorker {
            link: Arc::downgrade(self),
            transport: Arc::clone(transport),
            running: Arc::clone(&running),
            queue: queue_tx,
            stats: Arc::clone(&stats),
            span: span.clone(),
        };
        let dispatch = DispatchWorker {
            listeners: Arc::clone(&self.listeners),
            running: Arc::clone(&running),
            queue: queue_rx,
            poll: self.config.dispatch_poll,
            stats,
            span,
        };

        let dispatcher = thread::Builder::new()
            .name("link-dispatch".into())
            .spawn(move || dispatch.run())
            .map_err(|e| LinkError::Spawn { source: e })?;

        let receiver = match thread::Builder::new()
            .name("link-rx".into())
            .spawn(move || receive.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                // The queue sender died with the closure: dispatcher exits
                running.store(false, Ordering::SeqCst);
                let _ = dispatcher.join();
                return Err(LinkError::Spawn { source: e });
            }
        };

        Ok(Workers {
            running,
            receiver,
            dispatcher,
        })
    }

    /// Leave Connected: stop workers, close the transport, notify
    ///
    /// Only the caller that moves the link out of Connected does the work;
    /// every other caller gets false. Safe to call from a worker thread.
    pub(crate) fn teardown(&self, reason: DisconnectReason) -> bool {
        let _enter = self.instrumentation.span.enter();
        {
            let mut phase = self.phase.lock();
            while *phase == Phase::Connecting {
                self.phase_changed.wait(&mut phase);
            }
            if *phase != Phase::Connected {
                return false;
            }
            *phase = Phase::Disconnecting;
            self.phase_changed.notify_all();
        }

        if let Some(workers) = self.workers.lock().take() {
            workers.running.store(false, Ordering::SeqCst);
            let current = thread::current().id();
            for handle in [workers.receiver, workers.dispatcher] {
                if handle.thread().id() != current {
                    let _ = handle.join();
                }
            }
        }

        let transport = self.transport.lock().clone();
        if let Some(transport) = &transport {
            transport.disconnect();
        }
        self.set_phase(Phase::Disconnected);

        match reason {
            DisconnectReason::Requested => info!("Disconnected"),
            DisconnectReason::TransportLost => warn!("Disconnected: transport lost"),
            DisconnectReason::Reboot => info!("Disconnected for reboot"),
        }
        let callback = self.on_disconnect.read().clone();
        if let Some(callback) = callback {
            callback();
        }
        true
    }

    fn send(&self, command: &Command) -> Result<()> {
        let transport = self.current_transport().ok_or(LinkError::NotConnected)?;

        // Encode and write under one lock so sequence numbers hit the wire in order
        let written = {
            let mut tx_phase = self.tx_phase.lock();
            let mut frame = Vec::new();
            self.codec.lock().encode(command, &mut frame)?;
            write_frame(transport.as_ref(), &mut tx_phase, &frame).map(|n| (n, frame.len()))
        };

        match written {
            Ok((n, expected)) => {
                self.instrumentation.stats.add_tx(n);
                self.instrumentation.stats.add_command();
                if n < expected {
                    warn!("Short write for {}: {}/{} bytes", command.name(), n, expected);
                } else {
                    debug!("Sent {}", command.name());
                }
                Ok(())
            }
            Err(e) => {
                warn!("Write of {} failed: {}", command.name(), e);
                if e.is_transport_fault() {
                    self.teardown(DisconnectReason::TransportLost);
                }
                Err(e)
            }
        }
    }
}

fn write_frame(transport: &dyn Transport, tx_phase: &mut TxPhase, frame: &[u8]) -> Result<usize> {
    if *tx_phase == TxPhase::AwaitingFirstWrite {
        transport.flush()?;
        *tx_phase = TxPhase::Streaming;
    }
    transport.write(frame)
}

impl<C: Codec + 'static> Drop for Shared<C> {
    fn drop(&mut self) {
        // Workers may still hold the transport; they close it on exit
        if let Some(workers) = self.workers.get_mut().take() {
            workers.running.store(false, Ordering::SeqCst);
        }
        if let Some(sequence) = self.reboot.get_mut().take() {
            sequence.cancel();
        }
    }
}
