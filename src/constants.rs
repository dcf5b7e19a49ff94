//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Serial
// =============================================================================

/// Default baud rate for the flight controller UART
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

/// Read buffer size for one transport read
pub const READ_CHUNK_SIZE: usize = 1024;

// =============================================================================
// Network
// =============================================================================

/// Default TCP endpoint (SITL / telemetry bridges)
pub const DEFAULT_TCP_ADDRESS: &str = "127.0.0.1:5760";

/// TCP connect timeout (milliseconds)
pub const TCP_CONNECT_TIMEOUT_MS: u64 = 1000;

// =============================================================================
// Timing - Loops
// =============================================================================

/// Transport read timeout used by the receive loop (milliseconds)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Bounded wait of the dispatch loop on the message queue (milliseconds)
pub const DEFAULT_DISPATCH_POLL_MS: u64 = 100;

// =============================================================================
// Timing - Parameters
// =============================================================================

/// Receive window per parameter list request (milliseconds)
pub const DEFAULT_PARAM_RECEIVE_TIMEOUT_MS: u64 = 1000;

/// Parameter list request attempts
pub const DEFAULT_PARAM_MAX_ATTEMPTS: u32 = 5;

/// Extra delay between parameter list attempts (milliseconds)
pub const DEFAULT_PARAM_RETRY_DELAY_MS: u64 = 0;

/// Settle delay after a parameter set batch (milliseconds)
pub const DEFAULT_PARAM_SET_SETTLE_MS: u64 = 500;

// =============================================================================
// Timing - Reboot
// =============================================================================

/// Delay before closing the transport after the reboot command (milliseconds)
pub const DEFAULT_REBOOT_SETTLE_MS: u64 = 100;

/// Delay between closing the transport and the first reconnect (milliseconds)
pub const DEFAULT_REBOOT_RECONNECT_SETTLE_MS: u64 = 100;

/// Window in which the device must come back (milliseconds)
pub const DEFAULT_REBOOT_RECONNECT_TIMEOUT_MS: u64 = 3000;

/// Interval between reconnect attempts (milliseconds)
pub const DEFAULT_REBOOT_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// Protocol
// =============================================================================

/// System id used by this ground station
pub const GCS_SYSTEM_ID: u8 = 255;

/// MAV_COMP_ID_MISSIONPLANNER
pub const GCS_COMPONENT_ID: u8 = 190;

/// Maximum parameter name length on the wire
pub const PARAM_NAME_LEN: usize = 16;

/// MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN param1: reboot autopilot
pub const REBOOT_AUTOPILOT: f32 = 1.0;

/// MAV_CMD_PREFLIGHT_STORAGE param1: write parameters to storage
pub const STORAGE_WRITE_PERSISTENT: f32 = 1.0;

/// MAV_CMD_PREFLIGHT_STORAGE param1: reset parameters to defaults
pub const STORAGE_RESET_DEFAULTS: f32 = 2.0;

/// MOTOR_TEST_THROTTLE_PERCENT
pub const MOTOR_TEST_THROTTLE_PERCENT: f32 = 0.0;

/// Duration of one motor test command (seconds)
pub const MOTOR_TEST_TIMEOUT_SECS: f32 = 1.0;

// =============================================================================
// Ports
// =============================================================================

/// Serial enumeration interval for the port watcher (milliseconds)
pub const PORT_WATCH_INTERVAL_MS: u64 = 1000;

/// Interval between link statistics lines in monitor mode (milliseconds)
pub const STATS_REPORT_INTERVAL_MS: u64 = 1000;

/// Minimum interval between rate updates (seconds)
pub const RATE_UPDATE_MIN_INTERVAL_SECS: f64 = 0.1;
