//! Serial transport for flight controller UART / USB CDC
//!
//! The port is opened once and cloned into a read half and a write half so
//! the receive worker can block in `read` while commands are written.
//!
//! The transport reports itself lost when:
//! - the OS returns a read/write error other than a timeout
//! - too many consecutive zero-byte reads happen (USB unplug on some OSes)

use super::Transport;
use crate::constants::{DEFAULT_READ_TIMEOUT_MS, SERIAL_DISCONNECT_THRESHOLD};
use crate::error::{LinkError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

/// Serial port available on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// USB vendor/product id, when the port is a USB device
    pub usb_id: Option<(u16, u16)>,
    pub product: Option<String>,
}

/// Serial transport
///
/// # Example
///
/// ```ignore
/// let transport = Arc::new(SerialTransport::new("/dev/ttyACM0", 115_200));
/// link.connect(transport);
/// ```
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    timeout: Mutex<Duration>,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    connected: AtomicBool,
    zero_reads: AtomicU32,
}

impl SerialTransport {
    /// Create a closed serial transport for the specified port
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Mutex::new(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            zero_reads: AtomicU32::new(0),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// List serial ports present on the machine
    pub fn available_ports() -> Vec<PortInfo> {
        serialport::available_ports()
            .unwrap_or_default()
            .into_iter()
            .map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => PortInfo {
                    name: p.port_name,
                    usb_id: Some((usb.vid, usb.pid)),
                    product: usb.product,
                },
                _ => PortInfo {
                    name: p.port_name,
                    usb_id: None,
                    product: None,
                },
            })
            .collect()
    }

    /// Detect the flight controller port
    ///
    /// Succeeds only if exactly one USB serial port is present.
    ///
    /// # Errors
    ///
    /// - `NoDeviceFound` - No USB serial port found
    /// - `MultipleDevicesFound` - More than one USB serial port found
    pub fn detect() -> Result<String> {
        let matching: Vec<_> = Self::available_ports()
            .into_iter()
            .filter(|p| p.usb_id.is_some())
            .collect();

        match matching.len() {
            0 => Err(LinkError::NoDeviceFound),
            1 => Ok(matching[0].name.clone()),
            n => Err(LinkError::MultipleDevicesFound { count: n }),
        }
    }

    fn open(&self) -> Result<Box<dyn SerialPort>> {
        serialport::new(&self.port_name, self.baud_rate)
            .timeout(*self.timeout.lock())
            .open()
            .map_err(|e| LinkError::SerialOpen {
                port: self.port_name.clone(),
                source: std::io::Error::other(e.to_string()),
            })
    }
}

impl Transport for SerialTransport {
    fn connect(&self) -> Result<bool> {
        let mut reader = self.reader.lock();
        let mut writer = self.writer.lock();
        if reader.is_some() {
            return Ok(false);
        }

        let port = self.open()?;
        let port_write = port.try_clone().map_err(|e| LinkError::SerialOpen {
            port: self.port_name.clone(),
            source: std::io::Error::other(e.to_string()),
        })?;

        *reader = Some(port);
        *writer = Some(port_write);
        self.zero_reads.store(0, Ordering::Relaxed);
        self.connected.store(true, Ordering::SeqCst);
        debug!("Opened {} @ {} baud", self.port_name, self.baud_rate);
        Ok(true)
    }

    fn disconnect(&self) {
        // Write half first: the read half may be held by a read in progress
        let writer = self.writer.lock().take();
        let reader = self.reader.lock().take();
        if reader.is_some() || writer.is_some() {
            debug!("Closed {}", self.port_name);
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn read(&self, max_len: usize) -> Result<Bytes> {
        let mut guard = self.reader.lock();
        let Some(port) = guard.as_mut() else {
            return Ok(Bytes::new());
        };

        let mut buf = vec![0u8; max_len];
        match port.read(&mut buf) {
            Ok(n) if n > 0 => {
                self.zero_reads.store(0, Ordering::Relaxed);
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(_) => {
                // Zero bytes read - could be normal or port gone
                let count = self.zero_reads.fetch_add(1, Ordering::Relaxed) + 1;
                if count > SERIAL_DISCONNECT_THRESHOLD {
                    return Err(LinkError::TransportLost {
                        reason: "serial port stopped responding",
                    });
                }
                Ok(Bytes::new())
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut => {
                // Normal timeout, reset error counter
                self.zero_reads.store(0, Ordering::Relaxed);
                Ok(Bytes::new())
            }
            Err(e) => Err(LinkError::Transport { source: e }),
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut guard = self.writer.lock();
        let Some(port) = guard.as_mut() else {
            return Ok(0);
        };
        port.write_all(data)
            .map_err(|e| LinkError::Transport { source: e })?;
        Ok(data.len())
    }

    fn flush(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        match guard.as_mut() {
            Some(port) => port.flush().map_err(|e| LinkError::Transport { source: e }),
            None => Ok(()),
        }
    }

    fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
        for half in [&self.writer, &self.reader] {
            if let Some(port) = half.lock().as_mut() {
                let _ = port.set_timeout(timeout);
            }
        }
    }

    fn describe(&self) -> String {
        format!("serial:{}@{}", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_transport_new() {
        let transport = SerialTransport::new("COM3", 115_200);
        assert_eq!(transport.port_name(), "COM3");
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_serial_transport_closed_io_is_silent() {
        let transport = SerialTransport::new("/dev/does-not-exist", 115_200);
        assert!(transport.read(16).unwrap().is_empty());
        assert_eq!(transport.write(b"abc").unwrap(), 0);
        assert!(transport.flush().is_ok());
        transport.disconnect();
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_serial_transport_open_missing_port_fails() {
        let transport = SerialTransport::new("/dev/does-not-exist", 115_200);
        assert!(matches!(
            transport.connect(),
            Err(LinkError::SerialOpen { .. })
        ));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_describe() {
        let transport = SerialTransport::new("/dev/ttyACM0", 57_600);
        assert_eq!(transport.describe(), "serial:/dev/ttyACM0@57600");
    }
}
