//! Codec abstraction for message encoding/decoding
//!
//! Separates encoding concerns from transport:
//! - **Codec**: How messages are encoded/decoded (MAVLink, ...)
//! - **Transport**: How bytes flow (Serial, TCP, ...)
//!
//! Decoded traffic is a closed sum type (`Message`). Listeners key off its
//! `MessageKind` tag, never off a runtime message id, so a payload field named
//! like the frame id cannot be confused with it.
//!
//! # Adding a new codec
//!
//! 1. Create `codec/my_codec.rs`
//! 2. Implement the `Codec` trait
//! 3. Add `pub mod my_codec;` here
//! 4. No other changes needed

pub mod mav;

pub use mav::{MavlinkCodec, ProtocolVersion};

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Incoming messages
// =============================================================================

/// Registry key for decoded messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Heartbeat,
    Attitude,
    RcChannels,
    ParamValue,
    CommandAck,
    /// Any message the link does not model
    Other,
}

/// Decoded message from the remote device
///
/// Immutable once decoded; the same value may be handed to several listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Heartbeat(Heartbeat),
    Attitude(Attitude),
    RcChannels(RcChannels),
    ParamValue(Parameter),
    CommandAck(CommandAck),
    Other { id: u32 },
}

impl Message {
    /// Tag used for listener lookup
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Heartbeat(_) => MessageKind::Heartbeat,
            Self::Attitude(_) => MessageKind::Attitude,
            Self::RcChannels(_) => MessageKind::RcChannels,
            Self::ParamValue(_) => MessageKind::ParamValue,
            Self::CommandAck(_) => MessageKind::CommandAck,
            Self::Other { .. } => MessageKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub system_id: u8,
    pub component_id: u8,
    pub custom_mode: u32,
    pub mavlink_version: u8,
}

/// Vehicle attitude in radians and radians/second
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    pub time_boot_ms: u32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

/// Raw RC input, 1000..=2000 us per channel (`u16::MAX` = unused)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcChannels {
    pub time_boot_ms: u32,
    pub channel_count: u8,
    pub channels: [u16; 18],
    pub rssi: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    pub command: u16,
    pub result: u8,
}

/// One configuration parameter as reported by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f32,
    pub param_type: ParamType,
    pub index: u16,
    pub count: u16,
}

// =============================================================================
// Parameter types
// =============================================================================

/// Wire type of a parameter value (MAV_PARAM_TYPE tags)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    #[default]
    Real32,
    Real64,
}

impl ParamType {
    const ALL: [ParamType; 10] = [
        Self::Uint8,
        Self::Int8,
        Self::Uint16,
        Self::Int16,
        Self::Uint32,
        Self::Int32,
        Self::Uint64,
        Self::Int64,
        Self::Real32,
        Self::Real64,
    ];

    /// Protocol tag (1..=10)
    pub fn tag(self) -> u8 {
        match self {
            Self::Uint8 => 1,
            Self::Int8 => 2,
            Self::Uint16 => 3,
            Self::Int16 => 4,
            Self::Uint32 => 5,
            Self::Int32 => 6,
            Self::Uint64 => 7,
            Self::Int64 => 8,
            Self::Real32 => 9,
            Self::Real64 => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uint8 => "uint8",
            Self::Int8 => "int8",
            Self::Uint16 => "uint16",
            Self::Int16 => "int16",
            Self::Uint32 => "uint32",
            Self::Int32 => "int32",
            Self::Uint64 => "uint64",
            Self::Int64 => "int64",
            Self::Real32 => "real32",
            Self::Real64 => "real64",
        }
    }
}

impl TryFrom<u8> for ParamType {
    type Error = LinkError;

    fn try_from(tag: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == tag)
            .ok_or(LinkError::UnknownParamType { tag })
    }
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == lower)
            .ok_or_else(|| format!("unknown parameter type '{}'", s))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Outgoing commands
// =============================================================================

/// Long-command identifiers used by the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    PreflightRebootShutdown,
    PreflightStorage,
    DoMotorTest,
    ComponentArmDisarm,
}

impl CommandCode {
    /// MAV_CMD numeric id
    pub fn id(self) -> u16 {
        match self {
            Self::PreflightRebootShutdown => 246,
            Self::PreflightStorage => 245,
            Self::DoMotorTest => 209,
            Self::ComponentArmDisarm => 400,
        }
    }
}

/// Outgoing message built by the link and encoded by the codec
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Ask the device to stream every parameter
    RequestParameterList,
    /// Write one parameter
    SetParameter {
        name: String,
        value: f32,
        param_type: ParamType,
    },
    /// Generic long command with seven float params
    Long {
        command: CommandCode,
        params: [f32; 7],
    },
}

impl Command {
    /// Long command; missing params are zero, extra params are ignored
    pub fn long(command: CommandCode, params: &[f32]) -> Self {
        let mut all = [0.0f32; 7];
        for (slot, value) in all.iter_mut().zip(params) {
            *slot = *value;
        }
        Self::Long {
            command,
            params: all,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::RequestParameterList => "PARAM_REQUEST_LIST",
            Self::SetParameter { .. } => "PARAM_SET",
            Self::Long { .. } => "COMMAND_LONG",
        }
    }
}

// =============================================================================
// Codec trait
// =============================================================================

/// Codec trait for encoding/decoding messages
///
/// A codec transforms raw bytes into typed messages (decode)
/// and commands into bytes for transmission (encode).
pub trait Codec: Send {
    /// Decode incoming bytes
    ///
    /// Calls `on_message` for each complete message detected, in stream
    /// order. May buffer partial data internally. Returns the number of
    /// corrupt frames discarded.
    fn decode(&mut self, data: &[u8], on_message: impl FnMut(Message)) -> usize;

    /// Encode a command for transmission
    ///
    /// Appends encoded bytes to `output`.
    fn encode(&mut self, command: &Command, output: &mut Vec<u8>) -> Result<()>;

    /// Drop any buffered partial frame (called on every new connection)
    fn reset(&mut self);
}
