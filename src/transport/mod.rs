//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic:
//! - **Transport**: How bytes flow (Serial, TCP, in-memory mock)
//! - **Codec**: How messages are encoded/decoded (handled separately)
//!
//! # Adding a new transport
//!
//! 1. Create `transport/my_transport.rs`
//! 2. Implement the `Transport` trait
//! 3. Add `pub mod my_transport;` here
//! 4. Optionally add a `TransportConfig` variant so it can be configured

pub mod mock;
pub mod serial;
pub mod tcp;
pub mod watch;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use watch::PortWatcher;

use crate::constants::{DEFAULT_BAUD_RATE, DEFAULT_TCP_ADDRESS};
use crate::error::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Duplex byte channel owned by a link
///
/// A transport abstracts byte-level I/O operations. It handles:
/// - Opening/closing the OS resource (port, socket)
/// - Reading/writing raw bytes with a timeout
///
/// A transport does NOT handle:
/// - Message framing (that's the codec's job)
/// - Statistics or logging (that's the link's job)
/// - Reconnection logic (that's the link's job)
///
/// Methods take `&self`: reads happen on the receive worker while commands are
/// written from caller threads, so implementations synchronize internally and
/// keep the read and write halves independent.
///
/// # Contract
///
/// - `connect` returns `Ok(false)` without side effects if already connected,
///   `Err` if the resource cannot be opened.
/// - `disconnect` is an idempotent no-op when not connected.
/// - `read`/`write` on a disconnected transport return empty/zero.
/// - `read` returns empty on timeout; `Err` means the transport is lost.
pub trait Transport: Send + Sync {
    /// Open the underlying resource
    fn connect(&self) -> Result<bool>;

    /// Close the underlying resource
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Read up to `max_len` bytes, waiting at most the configured timeout
    fn read(&self, max_len: usize) -> Result<Bytes>;

    /// Write bytes, returning the count written
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Push any buffered output onto the wire
    fn flush(&self) -> Result<()>;

    /// Timeout for reads (and writes where supported)
    fn set_timeout(&self, timeout: Duration);

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;
}

/// Transport selection as stored in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial port (USB CDC or UART adapter)
    Serial {
        /// Port path; empty = auto-detect a single USB port
        #[serde(default)]
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// TCP client (SITL, network telemetry bridges)
    Tcp {
        #[serde(default = "default_tcp_address")]
        address: String,
    },
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_tcp_address() -> String {
    DEFAULT_TCP_ADDRESS.to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Serial {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl TransportConfig {
    /// Build a closed transport for this descriptor
    ///
    /// An empty serial port name triggers USB auto-detection.
    pub fn build(&self) -> Result<Arc<dyn Transport>> {
        match self {
            Self::Serial { port, baud_rate } => {
                let port = if port.is_empty() {
                    SerialTransport::detect()?
                } else {
                    port.clone()
                };
                Ok(Arc::new(SerialTransport::new(port, *baud_rate)))
            }
            Self::Tcp { address } => Ok(Arc::new(TcpTransport::new(address.clone()))),
        }
    }
}
