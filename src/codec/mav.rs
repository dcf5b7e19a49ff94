//! MAVLink codec backed by the `mavlink` crate
//!
//! Stream handling:
//! - bytes accumulate in an internal buffer
//! - garbage before a start marker (v1 `0xFE`, v2 `0xFD`) is skipped
//! - a frame that fails CRC or parsing is dropped by advancing one byte
//!
//! Only the messages the link cares about are mapped to typed `Message`
//! variants; everything else becomes `Message::Other`.

use super::{
    Attitude, Codec, Command, CommandAck, CommandCode, Heartbeat, Message, ParamType, Parameter,
    RcChannels,
};
use crate::constants::{GCS_COMPONENT_ID, GCS_SYSTEM_ID, PARAM_NAME_LEN};
use crate::error::{LinkError, Result};
use ::mavlink::common::{self as mav, MavCmd, MavMessage, MavParamType};
use ::mavlink::{MavHeader, Message as MavlinkMessage};
use serde::{Deserialize, Serialize};
use tracing::trace;

const MAGIC_V1: u8 = 0xFE;
const MAGIC_V2: u8 = 0xFD;
const V1_OVERHEAD: usize = 8;
const V2_OVERHEAD: usize = 12;
const V2_SIGNATURE_LEN: usize = 13;
const V2_FLAG_SIGNED: u8 = 0x01;

/// Buffer size without a start marker before it is flushed
const MAX_GARBAGE: usize = 512;

/// Wire version used for outgoing frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    #[default]
    V1,
    V2,
}

/// MAVLink codec (common dialect)
///
/// # Example
///
/// ```ignore
/// let mut codec = MavlinkCodec::new();
/// let mut out = Vec::new();
/// codec.encode(&Command::RequestParameterList, &mut out)?;
///
/// codec.decode(&incoming, |msg| println!("{:?}", msg));
/// ```
pub struct MavlinkCodec {
    buffer: Vec<u8>,
    version: ProtocolVersion,
    system_id: u8,
    component_id: u8,
    target_system: u8,
    target_component: u8,
    sequence: u8,
}

impl MavlinkCodec {
    /// Codec with ground-station ids, broadcast target and v1 framing
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024),
            version: ProtocolVersion::V1,
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            target_system: 0,
            target_component: 0,
            sequence: 0,
        }
    }

    /// Set the wire version for outgoing frames
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Set our own system/component ids
    pub fn with_source(mut self, system_id: u8, component_id: u8) -> Self {
        self.system_id = system_id;
        self.component_id = component_id;
        self
    }

    /// Set the addressed system/component (0 = all)
    pub fn with_target(mut self, system: u8, component: u8) -> Self {
        self.target_system = system;
        self.target_component = component;
        self
    }

    fn next_header(&mut self) -> MavHeader {
        let header = MavHeader {
            system_id: self.system_id,
            component_id: self.component_id,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        header
    }

    fn to_mavlink(&self, command: &Command) -> Result<MavMessage> {
        let msg = match command {
            Command::RequestParameterList => {
                MavMessage::PARAM_REQUEST_LIST(mav::PARAM_REQUEST_LIST_DATA {
                    target_system: self.target_system,
                    target_component: self.target_component,
                })
            }
            Command::SetParameter {
                name,
                value,
                param_type,
            } => MavMessage::PARAM_SET(mav::PARAM_SET_DATA {
                param_value: *value,
                target_system: self.target_system,
                target_component: self.target_component,
                param_id: encode_param_name(name)?,
                param_type: to_mav_param_type(*param_type),
            }),
            Command::Long { command, params } => MavMessage::COMMAND_LONG(mav::COMMAND_LONG_DATA {
                param1: params[0],
                param2: params[1],
                param3: params[2],
                param4: params[3],
                param5: params[4],
                param6: params[5],
                param7: params[6],
                command: to_mav_cmd(*command),
                target_system: self.target_system,
                target_component: self.target_component,
                confirmation: 0,
            }),
        };
        Ok(msg)
    }

    /// Length of the frame at the start of the buffer, if its header is in
    fn frame_len(&self) -> Option<usize> {
        let magic = *self.buffer.first()?;
        let payload_len = *self.buffer.get(1)? as usize;
        if magic == MAGIC_V1 {
            return Some(V1_OVERHEAD + payload_len);
        }
        let incompat_flags = *self.buffer.get(2)?;
        let signature = if incompat_flags & V2_FLAG_SIGNED != 0 {
            V2_SIGNATURE_LEN
        } else {
            0
        };
        Some(V2_OVERHEAD + payload_len + signature)
    }
}

impl Default for MavlinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for MavlinkCodec {
    fn decode(&mut self, data: &[u8], mut on_message: impl FnMut(Message)) -> usize {
        self.buffer.extend_from_slice(data);
        let mut corrupt = 0;

        loop {
            match self
                .buffer
                .iter()
                .position(|&b| b == MAGIC_V1 || b == MAGIC_V2)
            {
                Some(0) => {}
                Some(idx) => {
                    self.buffer.drain(..idx);
                }
                None => {
                    if self.buffer.len() > MAX_GARBAGE {
                        self.buffer.clear();
                    }
                    break;
                }
            }

            let Some(total_len) = self.frame_len() else {
                break;
            };
            if self.buffer.len() < total_len {
                break;
            }

            let mut reader = &self.buffer[..total_len];
            let parsed = if self.buffer[0] == MAGIC_V1 {
                ::mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
            } else {
                ::mavlink::read_v2_msg::<MavMessage, _>(&mut reader)
            };

            match parsed {
                Ok((header, body)) => {
                    self.buffer.drain(..total_len);
                    on_message(from_mavlink(&header, body));
                }
                Err(e) => {
                    trace!("Dropping corrupt frame: {:?}", e);
                    corrupt += 1;
                    self.buffer.drain(..1);
                }
            }
        }

        corrupt
    }

    fn encode(&mut self, command: &Command, output: &mut Vec<u8>) -> Result<()> {
        let msg = self.to_mavlink(command)?;
        let header = self.next_header();
        let written = match self.version {
            ProtocolVersion::V1 => ::mavlink::write_v1_msg(output, header, &msg),
            ProtocolVersion::V2 => ::mavlink::write_v2_msg(output, header, &msg),
        };
        written.map_err(|e| LinkError::Encode {
            reason: format!("{:?}", e),
        })?;
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

// =============================================================================
// Conversions
// =============================================================================

fn from_mavlink(header: &MavHeader, msg: MavMessage) -> Message {
    match msg {
        MavMessage::HEARTBEAT(data) => Message::Heartbeat(Heartbeat {
            system_id: header.system_id,
            component_id: header.component_id,
            custom_mode: data.custom_mode,
            mavlink_version: data.mavlink_version,
        }),
        MavMessage::ATTITUDE(data) => Message::Attitude(Attitude {
            time_boot_ms: data.time_boot_ms,
            roll: data.roll,
            pitch: data.pitch,
            yaw: data.yaw,
            rollspeed: data.rollspeed,
            pitchspeed: data.pitchspeed,
            yawspeed: data.yawspeed,
        }),
        MavMessage::RC_CHANNELS(data) => Message::RcChannels(RcChannels {
            time_boot_ms: data.time_boot_ms,
            channel_count: data.chancount,
            channels: [
                data.chan1_raw,
                data.chan2_raw,
                data.chan3_raw,
                data.chan4_raw,
                data.chan5_raw,
                data.chan6_raw,
                data.chan7_raw,
                data.chan8_raw,
                data.chan9_raw,
                data.chan10_raw,
                data.chan11_raw,
                data.chan12_raw,
                data.chan13_raw,
                data.chan14_raw,
                data.chan15_raw,
                data.chan16_raw,
                data.chan17_raw,
                data.chan18_raw,
            ],
            rssi: data.rssi,
        }),
        MavMessage::PARAM_VALUE(data) => Message::ParamValue(Parameter {
            name: decode_param_name(&data.param_id),
            value: data.param_value,
            param_type: ParamType::try_from(data.param_type as u8).unwrap_or_default(),
            index: data.param_index,
            count: data.param_count,
        }),
        MavMessage::COMMAND_ACK(data) => Message::CommandAck(CommandAck {
            command: data.command as u16,
            result: data.result as u8,
        }),
        other => Message::Other {
            id: other.message_id(),
        },
    }
}

fn to_mav_cmd(code: CommandCode) -> MavCmd {
    match code {
        CommandCode::PreflightRebootShutdown => MavCmd::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN,
        CommandCode::PreflightStorage => MavCmd::MAV_CMD_PREFLIGHT_STORAGE,
        CommandCode::DoMotorTest => MavCmd::MAV_CMD_DO_MOTOR_TEST,
        CommandCode::ComponentArmDisarm => MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
    }
}

fn to_mav_param_type(param_type: ParamType) -> MavParamType {
    match param_type {
        ParamType::Uint8 => MavParamType::MAV_PARAM_TYPE_UINT8,
        ParamType::Int8 => MavParamType::MAV_PARAM_TYPE_INT8,
        ParamType::Uint16 => MavParamType::MAV_PARAM_TYPE_UINT16,
        ParamType::Int16 => MavParamType::MAV_PARAM_TYPE_INT16,
        ParamType::Uint32 => MavParamType::MAV_PARAM_TYPE_UINT32,
        ParamType::Int32 => MavParamType::MAV_PARAM_TYPE_INT32,
        ParamType::Uint64 => MavParamType::MAV_PARAM_TYPE_UINT64,
        ParamType::Int64 => MavParamType::MAV_PARAM_TYPE_INT64,
        ParamType::Real32 => MavParamType::MAV_PARAM_TYPE_REAL32,
        ParamType::Real64 => MavParamType::MAV_PARAM_TYPE_REAL64,
    }
}

/// Pack a name into the fixed, NUL-padded wire field
fn encode_param_name(name: &str) -> Result<[u8; PARAM_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > PARAM_NAME_LEN {
        return Err(LinkError::ParameterName { name: name.into() });
    }
    let mut field = [0u8; PARAM_NAME_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Field is NUL-terminated unless all 16 bytes are used
fn decode_param_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
