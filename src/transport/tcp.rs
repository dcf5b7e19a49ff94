//! TCP client transport
//!
//! Used for SITL and network telemetry bridges. A clean EOF from the peer is
//! reported as a lost transport.

use super::Transport;
use crate::constants::{DEFAULT_READ_TIMEOUT_MS, TCP_CONNECT_TIMEOUT_MS};
use crate::error::{LinkError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

pub struct TcpTransport {
    address: String,
    timeout: Mutex<Duration>,
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<Option<TcpStream>>,
    connected: AtomicBool,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: Mutex::new(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn open(&self) -> std::io::Result<TcpStream> {
        let addrs = self.address.to_socket_addrs()?;
        let mut last_err = std::io::Error::new(ErrorKind::NotFound, "address did not resolve");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, Duration::from_millis(TCP_CONNECT_TIMEOUT_MS)) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

impl Transport for TcpTransport {
    fn connect(&self) -> Result<bool> {
        let mut reader = self.reader.lock();
        let mut writer = self.writer.lock();
        if reader.is_some() {
            return Ok(false);
        }

        let connect_err = |source| LinkError::TcpConnect {
            address: self.address.clone(),
            source,
        };
        let stream = self.open().map_err(connect_err)?;
        let _ = stream.set_nodelay(true);
        stream
            .set_read_timeout(Some(*self.timeout.lock()))
            .map_err(connect_err)?;
        let write_half = stream.try_clone().map_err(connect_err)?;

        *reader = Some(stream);
        *writer = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
        debug!("Connected to {}", self.address);
        Ok(true)
    }

    fn disconnect(&self) {
        let writer = self.writer.lock().take();
        if let Some(stream) = &writer {
            // Unblocks a read in progress on the other half
            let _ = stream.shutdown(Shutdown::Both);
        }
        let reader = self.reader.lock().take();
        if reader.is_some() || writer.is_some() {
            debug!("Disconnected from {}", self.address);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn read(&self, max_len: usize) -> Result<Bytes> {
        let mut guard = self.reader.lock();
        let Some(stream) = guard.as_mut() else {
            return Ok(Bytes::new());
        };

        let mut buf = vec![0u8; max_len];
        match stream.read(&mut buf) {
            Ok(0) => Err(LinkError::TransportLost {
                reason: "peer closed the connection",
            }),
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(Bytes::new())
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => Ok(Bytes::new()),
            Err(e) => Err(LinkError::Transport { source: e }),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock();
        let Some(stream) = guard.as_mut() else {
            return Ok(0);
        };
        stream
            .write_all(data)
            .map_err(|e| LinkError::Transport { source: e })?;
        Ok(data.len())
    }

    fn flush(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        match guard.as_mut() {
            Some(stream) => stream.flush().map_err(|e| LinkError::Transport { source: e }),
            None => Ok(()),
        }
    }

    fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
        if let Some(stream) = self.writer.lock().as_ref() {
            // Socket options are shared between cloned handles
            let _ = stream.set_read_timeout(Some(timeout));
            let _ = stream.set_write_timeout(Some(timeout));
        }
    }

    fn describe(&self) -> String {
        format!("tcp:{}", self.address)
    }
}
