//! In-memory transport simulating a device
//!
//! Used by tests and demos to drive a link without hardware:
//! - inbound bytes are queued with `push_inbound` and handed out by `read`
//! - every `write` is recorded and passed to an optional responder, which can
//!   script the device's reaction (answer a request, vanish on reboot, ...)
//! - availability can be switched off, or off for a while, to make `connect`
//!   fail the way an unplugged port does

use super::Transport;
use crate::constants::DEFAULT_READ_TIMEOUT_MS;
use crate::error::{LinkError, Result};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&MockTransport, &[u8]) + Send>;

struct MockState {
    connected: bool,
    available: bool,
    unavailable_until: Option<Instant>,
    inbound: VecDeque<u8>,
    writes: Vec<Vec<u8>>,
    connect_count: usize,
    flush_count: usize,
    timeout: Duration,
    fail_next_read: bool,
    fail_writes: bool,
}

/// Scripted in-memory device
pub struct MockTransport {
    state: Mutex<MockState>,
    cond: Condvar,
    responder: Mutex<Option<Responder>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Available, closed, with nothing queued
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                connected: false,
                available: true,
                unavailable_until: None,
                inbound: VecDeque::new(),
                writes: Vec::new(),
                connect_count: 0,
                flush_count: 0,
                timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
                fail_next_read: false,
                fail_writes: false,
            }),
            cond: Condvar::new(),
            responder: Mutex::new(None),
        }
    }

    /// React to every written chunk
    ///
    /// The responder runs on the writing thread. It may call any method of the
    /// transport except `write`.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&MockTransport, &[u8]) + Send + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Queue bytes for the next reads
    pub fn push_inbound(&self, data: &[u8]) {
        let mut state = self.state.lock();
        state.inbound.extend(data.iter().copied());
        self.cond.notify_all();
    }

    /// Make `connect` succeed or fail from now on
    pub fn set_available(&self, available: bool) {
        let mut state = self.state.lock();
        state.available = available;
        state.unavailable_until = None;
    }

    /// Make `connect` fail until `duration` has elapsed
    pub fn set_unavailable_for(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.available = true;
        state.unavailable_until = Some(Instant::now() + duration);
    }

    /// Make the next read fail as if the device was unplugged
    pub fn fail_next_read(&self) {
        let mut state = self.state.lock();
        state.fail_next_read = true;
        self.cond.notify_all();
    }

    /// Make writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Every chunk written so far, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Successful opens since creation
    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flush_count
    }

    pub fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    fn is_available(state: &MockState) -> bool {
        state.available
            && state
                .unavailable_until
                .map_or(true, |until| Instant::now() >= until)
    }
}

impl Transport for MockTransport {
    fn connect(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if state.connected {
            return Ok(false);
        }
        if !Self::is_available(&state) {
            return Err(LinkError::Transport {
                source: std::io::Error::new(ErrorKind::NotFound, "mock device unavailable"),
            });
        }
        state.connected = true;
        state.connect_count += 1;
        state.fail_next_read = false;
        Ok(true)
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        self.cond.notify_all();
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn read(&self, max_len: usize) -> Result<Bytes> {
        let mut state = self.state.lock();
        let deadline = Instant::now() + state.timeout;
        loop {
            if state.connected && state.fail_next_read {
                state.fail_next_read = false;
                return Err(LinkError::TransportLost {
                    reason: "mock device unplugged",
                });
            }
            if state.connected && !state.inbound.is_empty() {
                let n = max_len.min(state.inbound.len());
                let chunk: Vec<u8> = state.inbound.drain(..n).collect();
                return Ok(Bytes::from(chunk));
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return Ok(Bytes::new());
            }
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Ok(0);
            }
            if state.fail_writes {
                return Err(LinkError::Transport {
                    source: std::io::Error::new(ErrorKind::BrokenPipe, "mock write failure"),
                });
            }
            state.writes.push(data.to_vec());
        }

        if let Some(responder) = self.responder.lock().as_mut() {
            responder(self, data);
        }
        Ok(data.len())
    }

    fn flush(&self) -> Result<()> {
        self.state.lock().flush_count += 1;
        Ok(())
    }

    fn set_timeout(&self, timeout: Duration) {
        self.state.lock().timeout = timeout;
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
