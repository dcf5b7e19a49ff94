//! Configuration management
//!
//! Config file is `gcs-link.toml` in the working directory unless a path is
//! given. Every section is optional; missing values take their defaults.

use crate::codec::{MavlinkCodec, ProtocolVersion};
use crate::constants::*;
use crate::error::{LinkError, Result};
use crate::link::{FetchOptions, LinkConfig};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "gcs-link.toml";

// =============================================================================
// Application Configuration
// =============================================================================

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub link: LinkSettings,
    pub protocol: ProtocolSettings,
}

// =============================================================================
// Link timing
// =============================================================================

/// Link and compound-operation timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Transport read timeout of the receive loop
    pub read_timeout_ms: u64,
    /// Bounded wait of the dispatch loop
    pub dispatch_poll_ms: u64,

    // =========================================================================
    // Parameters
    // =========================================================================
    /// Listening window after each parameter list request
    pub param_receive_timeout_ms: u64,
    /// Parameter list requests before giving up
    pub param_max_attempts: u32,
    /// Extra pause between parameter list requests
    pub param_retry_delay_ms: u64,
    /// Wait after a parameter set batch before reporting completion
    pub param_set_settle_ms: u64,

    // =========================================================================
    // Reboot
    // =========================================================================
    pub reboot_settle_ms: u64,
    pub reboot_reconnect_settle_ms: u64,
    /// Window in which the device must reappear
    pub reboot_reconnect_timeout_ms: u64,
    pub reboot_poll_interval_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            dispatch_poll_ms: DEFAULT_DISPATCH_POLL_MS,
            param_receive_timeout_ms: DEFAULT_PARAM_RECEIVE_TIMEOUT_MS,
            param_max_attempts: DEFAULT_PARAM_MAX_ATTEMPTS,
            param_retry_delay_ms: DEFAULT_PARAM_RETRY_DELAY_MS,
            param_set_settle_ms: DEFAULT_PARAM_SET_SETTLE_MS,
            reboot_settle_ms: DEFAULT_REBOOT_SETTLE_MS,
            reboot_reconnect_settle_ms: DEFAULT_REBOOT_RECONNECT_SETTLE_MS,
            reboot_reconnect_timeout_ms: DEFAULT_REBOOT_RECONNECT_TIMEOUT_MS,
            reboot_poll_interval_ms: DEFAULT_REBOOT_POLL_INTERVAL_MS,
        }
    }
}

impl LinkSettings {
    pub fn to_link_config(&self) -> LinkConfig {
        let ms = Duration::from_millis;
        LinkConfig {
            read_timeout: ms(self.read_timeout_ms),
            dispatch_poll: ms(self.dispatch_poll_ms),
            param_receive_timeout: ms(self.param_receive_timeout_ms),
            param_max_attempts: self.param_max_attempts,
            param_retry_delay: ms(self.param_retry_delay_ms),
            param_set_settle: ms(self.param_set_settle_ms),
            reboot_settle: ms(self.reboot_settle_ms),
            reboot_reconnect_settle: ms(self.reboot_reconnect_settle_ms),
            reboot_reconnect_timeout: ms(self.reboot_reconnect_timeout_ms),
            reboot_poll_interval: ms(self.reboot_poll_interval_ms),
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions::from(&self.to_link_config())
    }
}

// =============================================================================
// Protocol identity
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Our system id on the MAVLink network
    pub system_id: u8,
    pub component_id: u8,
    /// Addressed system (0 = broadcast)
    pub target_system: u8,
    pub target_component: u8,
    /// Framing used for outgoing messages
    pub version: ProtocolVersion,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            target_system: 0,
            target_component: 0,
            version: ProtocolVersion::default(),
        }
    }
}

impl ProtocolSettings {
    /// Codec configured with these ids and framing
    pub fn codec(&self) -> MavlinkCodec {
        MavlinkCodec::new()
            .with_version(self.version)
            .with_source(self.system_id, self.component_id)
            .with_target(self.target_system, self.target_component)
    }
}

// =============================================================================
// Validation
// =============================================================================

impl Config {
    /// Reject values the link cannot run with
    pub fn validate(&self) -> Result<()> {
        let link = &self.link;
        if link.param_max_attempts == 0 {
            return Err(LinkError::ConfigValidation {
                field: "link.param_max_attempts",
                reason: "must be at least 1".into(),
            });
        }
        for (field, value) in [
            ("link.read_timeout_ms", link.read_timeout_ms),
            ("link.dispatch_poll_ms", link.dispatch_poll_ms),
            ("link.reboot_poll_interval_ms", link.reboot_poll_interval_ms),
        ] {
            if value == 0 {
                return Err(LinkError::ConfigValidation {
                    field,
                    reason: "must be greater than 0".into(),
                });
            }
        }
        if let TransportConfig::Serial { baud_rate: 0, .. } = self.transport {
            return Err(LinkError::ConfigValidation {
                field: "transport.baud_rate",
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Load / save
// =============================================================================

/// Config path: explicit, or `gcs-link.toml` in the working directory
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME))
}

/// Load config from file, falling back to defaults
///
/// A missing file is normal. An unreadable, unparsable or invalid file is
/// logged and ignored.
pub fn load(explicit: Option<&Path>) -> Config {
    let path = config_path(explicit);
    if !path.exists() {
        debug!("No config at {:?}, using defaults", path);
        return Config::default();
    }

    let config: Config = match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Config parse error in {:?}: {}, using defaults", path, e);
                return Config::default();
            }
        },
        Err(e) => {
            warn!("Failed to read config {:?}: {}, using defaults", path, e);
            return Config::default();
        }
    };

    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            warn!("Config {:?} rejected: {}, using defaults", path, e);
            Config::default()
        }
    }
}

/// Save config to file
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let io_err = |source| LinkError::Io {
        path: path.to_path_buf(),
        source,
    };
    let content =
        toml::to_string_pretty(config).map_err(|e| io_err(std::io::Error::other(e.to_string())))?;
    fs::write(path, content).map_err(io_err)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
