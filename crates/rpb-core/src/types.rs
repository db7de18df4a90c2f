//! Remote object types and message payloads

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Identifier of a processing node
pub type NodeId = u64;

/// Identifier of a protocol endpoint
pub type ProtocolId = u64;

/// Address component value meaning "not addressed"
pub const INVALID_ADDRESS_VALUE: i16 = -1;

/// Remote object identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteObjectIdentifier {
    HeartbeatPing,
    HeartbeatPong,
    Invalid,
    SoundObjectPositionX,
    SoundObjectPositionY,
    #[serde(rename = "sound_object_position_xy")]
    SoundObjectPositionXY,
    SoundObjectSpread,
    SoundObjectDelayMode,
    ReverbSendGain,
}

/// Short alias used throughout the bridge crates
pub type Roi = RemoteObjectIdentifier;

impl RemoteObjectIdentifier {
    pub const ALL: [RemoteObjectIdentifier; 9] = [
        Roi::HeartbeatPing,
        Roi::HeartbeatPong,
        Roi::Invalid,
        Roi::SoundObjectPositionX,
        Roi::SoundObjectPositionY,
        Roi::SoundObjectPositionXY,
        Roi::SoundObjectSpread,
        Roi::SoundObjectDelayMode,
        Roi::ReverbSendGain,
    ];

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            Roi::HeartbeatPing => "PING",
            Roi::HeartbeatPong => "PONG",
            Roi::Invalid => "Invalid",
            Roi::SoundObjectPositionX => "Sound Object Position X",
            Roi::SoundObjectPositionY => "Sound Object Position Y",
            Roi::SoundObjectPositionXY => "Sound Object Position XY",
            Roi::SoundObjectSpread => "Sound Object Spread",
            Roi::SoundObjectDelayMode => "Sound Object Delay Mode",
            Roi::ReverbSendGain => "En-Space Send Gain",
        }
    }

    /// Ping and pong only keep a connection alive and carry no object value
    pub fn is_keepalive(&self) -> bool {
        matches!(self, Roi::HeartbeatPing | Roi::HeartbeatPong)
    }

    /// Number of values a complete update of this object carries
    pub fn value_count(&self) -> u16 {
        match self {
            Roi::HeartbeatPing | Roi::HeartbeatPong | Roi::Invalid => 0,
            Roi::SoundObjectPositionXY => 2,
            _ => 1,
        }
    }

    /// Value type a complete update of this object carries
    pub fn value_type(&self) -> RemoteObjectValueType {
        match self {
            Roi::HeartbeatPing | Roi::HeartbeatPong | Roi::Invalid => RemoteObjectValueType::None,
            Roi::SoundObjectDelayMode => RemoteObjectValueType::Int,
            _ => RemoteObjectValueType::Float,
        }
    }
}

impl fmt::Display for RemoteObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Channel (primary) and record/mapping (secondary) address of a remote object
///
/// Ordering is lexicographic on `(primary, secondary)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteObjectAddressing {
    pub primary: i16,
    pub secondary: i16,
}

impl RemoteObjectAddressing {
    pub const fn new(primary: i16, secondary: i16) -> Self {
        Self { primary, secondary }
    }

    pub const fn invalid() -> Self {
        Self::new(INVALID_ADDRESS_VALUE, INVALID_ADDRESS_VALUE)
    }

    pub fn has_primary(&self) -> bool {
        self.primary != INVALID_ADDRESS_VALUE
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary != INVALID_ADDRESS_VALUE
    }

    /// Flat key combining both components, `primary + (secondary << 16)`
    pub fn key(&self) -> i32 {
        self.primary as i32 + ((self.secondary as i32) << 16)
    }

    pub fn with_primary(self, primary: i16) -> Self {
        Self { primary, ..self }
    }
}

impl Default for RemoteObjectAddressing {
    fn default() -> Self {
        Self::invalid()
    }
}

/// Type of the values carried in a message payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteObjectValueType {
    #[default]
    None,
    Int,
    Float,
    String,
}

impl RemoteObjectValueType {
    /// Size in bytes of one value of this type
    pub fn size_of(&self) -> usize {
        match self {
            RemoteObjectValueType::None => 0,
            RemoteObjectValueType::Int => std::mem::size_of::<i32>(),
            RemoteObjectValueType::Float => std::mem::size_of::<f32>(),
            RemoteObjectValueType::String => 1,
        }
    }
}

/// Generic message exchanged between protocol processors
///
/// The payload holds `value_count` values of `value_type` in native byte order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteObjectMessageData {
    pub addressing: RemoteObjectAddressing,
    pub value_type: RemoteObjectValueType,
    pub value_count: u16,
    pub payload: Bytes,
}

impl RemoteObjectMessageData {
    /// Address-only message without values
    pub fn empty(addressing: RemoteObjectAddressing) -> Self {
        Self {
            addressing,
            value_type: RemoteObjectValueType::None,
            value_count: 0,
            payload: Bytes::new(),
        }
    }

    pub fn from_floats(addressing: RemoteObjectAddressing, values: &[f32]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for value in values {
            buf.put_slice(&value.to_ne_bytes());
        }
        Self {
            addressing,
            value_type: RemoteObjectValueType::Float,
            value_count: values.len() as u16,
            payload: buf.freeze(),
        }
    }

    pub fn from_ints(addressing: RemoteObjectAddressing, values: &[i32]) -> Self {
        let mut buf = BytesMut::with_capacity(values.len() * 4);
        for value in values {
            buf.put_slice(&value.to_ne_bytes());
        }
        Self {
            addressing,
            value_type: RemoteObjectValueType::Int,
            value_count: values.len() as u16,
            payload: buf.freeze(),
        }
    }

    pub fn from_string(addressing: RemoteObjectAddressing, value: &str) -> Self {
        Self {
            addressing,
            value_type: RemoteObjectValueType::String,
            value_count: value.len() as u16,
            payload: Bytes::copy_from_slice(value.as_bytes()),
        }
    }

    /// Same payload re-addressed
    pub fn with_addressing(&self, addressing: RemoteObjectAddressing) -> Self {
        Self {
            addressing,
            ..self.clone()
        }
    }

    pub fn has_values(&self) -> bool {
        self.value_count > 0
    }

    /// Payload length matches `value_count * size_of(value_type)`
    pub fn is_consistent(&self) -> bool {
        self.payload.len() == self.value_count as usize * self.value_type.size_of()
    }

    /// Float values, if this is a consistent float payload
    pub fn floats(&self) -> Option<Vec<f32>> {
        if self.value_type != RemoteObjectValueType::Float || !self.is_consistent() {
            return None;
        }
        Some(
            self.payload
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Int values, if this is a consistent int payload
    pub fn ints(&self) -> Option<Vec<i32>> {
        if self.value_type != RemoteObjectValueType::Int || !self.is_consistent() {
            return None;
        }
        Some(
            self.payload
                .chunks_exact(4)
                .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }
}

/// A concrete parameter instance that a protocol polls proactively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RemoteObject {
    pub roi: RemoteObjectIdentifier,
    pub addressing: RemoteObjectAddressing,
}

impl RemoteObject {
    pub fn new(roi: RemoteObjectIdentifier, addressing: RemoteObjectAddressing) -> Self {
        Self { roi, addressing }
    }
}

/// Supported protocol processor types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolType {
    #[default]
    #[serde(rename = "Invalid")]
    Invalid,
    #[serde(rename = "OCA")]
    Oca,
    #[serde(rename = "OSC")]
    Osc,
    #[serde(rename = "MIDI")]
    Midi,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Invalid => "Invalid",
            ProtocolType::Oca => "OCA",
            ProtocolType::Osc => "OSC",
            ProtocolType::Midi => "MIDI",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OCA" => Ok(ProtocolType::Oca),
            "OSC" => Ok(ProtocolType::Osc),
            "MIDI" => Ok(ProtocolType::Midi),
            "Invalid" => Ok(ProtocolType::Invalid),
            other => Err(Error::UnknownProtocolType(other.to_string())),
        }
    }
}

/// Selects the data handling strategy of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectHandlingMode {
    Invalid,
    #[default]
    Bypass,
    #[serde(rename = "remap_a_x_y_to_b_xy")]
    RemapAXYToBXY,
    #[serde(rename = "mux_n_a_to_m_b")]
    MuxNAToMB,
    ForwardOnlyValueChanges,
    #[serde(rename = "forward_a_to_b_only")]
    ForwardAToBOnly,
    #[serde(rename = "reverse_b_to_a_only")]
    ReverseBToAOnly,
    #[serde(rename = "mux_n_a_to_m_b_with_val_filter")]
    MuxNAToMBWithValFilter,
}

impl ObjectHandlingMode {
    pub const ALL: [ObjectHandlingMode; 7] = [
        ObjectHandlingMode::Bypass,
        ObjectHandlingMode::RemapAXYToBXY,
        ObjectHandlingMode::MuxNAToMB,
        ObjectHandlingMode::ForwardOnlyValueChanges,
        ObjectHandlingMode::ForwardAToBOnly,
        ObjectHandlingMode::ReverseBToAOnly,
        ObjectHandlingMode::MuxNAToMBWithValFilter,
    ];

    /// Display name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            ObjectHandlingMode::Invalid => "Invalid",
            ObjectHandlingMode::Bypass => "Bypass (A<->B)",
            ObjectHandlingMode::RemapAXYToBXY => "Reroute single A (x), (y) to combi B (xy)",
            ObjectHandlingMode::MuxNAToMB => "Multiplex multiple n-ch. A to m-ch. B protocols",
            ObjectHandlingMode::ForwardOnlyValueChanges => "Forward value changes only",
            ObjectHandlingMode::ForwardAToBOnly => "Forward data only (A->B)",
            ObjectHandlingMode::ReverseBToAOnly => "Reverse data only (B->A)",
            ObjectHandlingMode::MuxNAToMBWithValFilter => {
                "Multiplex mult. n-ch. A to m-ch. B (fwd. val. changes only)"
            }
        }
    }

    /// Modes that translate channels between the two roles
    pub fn is_multiplexing(&self) -> bool {
        matches!(
            self,
            ObjectHandlingMode::MuxNAToMB | ObjectHandlingMode::MuxNAToMBWithValFilter
        )
    }
}

impl fmt::Display for ObjectHandlingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ObjectHandlingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ObjectHandlingMode::Invalid.display_name() {
            return Ok(ObjectHandlingMode::Invalid);
        }
        ObjectHandlingMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.display_name() == s)
            .ok_or_else(|| Error::UnknownHandlingMode(s.to_string()))
    }
}
