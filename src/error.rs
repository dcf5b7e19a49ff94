//! Centralized error types for the link
//!
//! All link errors are represented by the `LinkError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, LinkError>`.

use std::fmt;
use std::path::PathBuf;

/// All link errors
#[derive(Debug)]
pub enum LinkError {
    // === Transport open ===
    /// Failed to open serial port
    SerialOpen {
        port: String,
        source: std::io::Error,
    },
    /// Failed to connect TCP socket
    TcpConnect {
        address: String,
        source: std::io::Error,
    },

    // === Transport fault ===
    /// Read or write failed on an open transport
    Transport { source: std::io::Error },
    /// Transport stopped delivering data (unplugged, peer closed)
    TransportLost { reason: &'static str },

    // === Link state ===
    /// Operation requires a connected link
    NotConnected,
    /// A reboot sequence is already running
    RebootInProgress,

    // === Encoding ===
    /// Parameter name does not fit the protocol field
    ParameterName { name: String },
    /// Unknown parameter type tag
    UnknownParamType { tag: u8 },
    /// Codec could not encode a command
    Encode { reason: String },

    // === Detection ===
    /// No serial device found
    NoDeviceFound,
    /// Multiple serial devices found
    MultipleDevicesFound { count: usize },

    // === Config ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Runtime ===
    /// Worker thread could not be started
    Spawn { source: std::io::Error },
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SerialOpen { source, .. }
            | Self::TcpConnect { source, .. }
            | Self::Transport { source }
            | Self::Io { source, .. }
            | Self::Spawn { source } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialOpen { port, source } => {
                write!(f, "Cannot open serial port {}: {}", port, source)
            }
            Self::TcpConnect { address, source } => {
                write!(f, "Cannot connect to {}: {}", address, source)
            }
            Self::Transport { source } => write!(f, "Transport error: {}", source),
            Self::TransportLost { reason } => write!(f, "Transport lost: {}", reason),
            Self::NotConnected => write!(f, "Link is not connected"),
            Self::RebootInProgress => write!(f, "Reboot already in progress"),
            Self::ParameterName { name } => {
                write!(f, "Parameter name too long (max 16 bytes): {}", name)
            }
            Self::UnknownParamType { tag } => write!(f, "Unknown parameter type {}", tag),
            Self::Encode { reason } => write!(f, "Cannot encode command: {}", reason),
            Self::NoDeviceFound => write!(f, "No device found"),
            Self::MultipleDevicesFound { count } => {
                write!(f, "Multiple devices found ({})", count)
            }
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Spawn { source } => write!(f, "Cannot start worker thread: {}", source),
        }
    }
}

impl LinkError {
    /// True for faults that mean the transport is gone
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::TransportLost { .. })
    }
}

/// Alias for Result with LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_serial_open() {
        let err = LinkError::SerialOpen {
            port: "/dev/ttyACM0".into(),
            source: std::io::Error::other("busy"),
        };
        assert_eq!(err.to_string(), "Cannot open serial port /dev/ttyACM0: busy");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_transport_fault_classification() {
        assert!(LinkError::TransportLost { reason: "eof" }.is_transport_fault());
        assert!(LinkError::Transport {
            source: std::io::Error::other("x")
        }
        .is_transport_fault());
        assert!(!LinkError::NotConnected.is_transport_fault());
    }
}
