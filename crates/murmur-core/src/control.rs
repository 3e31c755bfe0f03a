//! Control channel framing and message dispatch.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+--------------------+----------------------+
//! | Type (u16, BE) | Length (u32, BE)   | Payload (protobuf)   |
//! +----------------+--------------------+----------------------+
//! ```
//!
//! The payload is a schema-defined record. Only the records the client core
//! acts on are decoded; the rest are carried as opaque bytes.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message as _;

use crate::proto;
use crate::{ProtocolError, CONTROL_HEADER_SIZE, MAX_CONTROL_PAYLOAD};

/// Control message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Version = 0,
    UdpTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    Acl = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
    SuggestConfig = 25,
}

impl TryFrom<u16> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use MessageType::*;
        let kind = match value {
            0 => Version,
            1 => UdpTunnel,
            2 => Authenticate,
            3 => Ping,
            4 => Reject,
            5 => ServerSync,
            6 => ChannelRemove,
            7 => ChannelState,
            8 => UserRemove,
            9 => UserState,
            10 => BanList,
            11 => TextMessage,
            12 => PermissionDenied,
            13 => Acl,
            14 => QueryUsers,
            15 => CryptSetup,
            16 => ContextActionModify,
            17 => ContextAction,
            18 => UserList,
            19 => VoiceTarget,
            20 => PermissionQuery,
            21 => CodecVersion,
            22 => UserStats,
            23 => RequestBlob,
            24 => ServerConfig,
            25 => SuggestConfig,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(kind)
    }
}

/// Control frame header (6 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type tag; validated when the payload is decoded.
    pub message_type: u16,
    pub length: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; CONTROL_HEADER_SIZE] {
        let mut out = [0u8; CONTROL_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.message_type.to_be_bytes());
        out[2..6].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    /// Decode a header, rejecting lengths beyond [`MAX_CONTROL_PAYLOAD`].
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < CONTROL_HEADER_SIZE {
            return Err(ProtocolError::TooShort(buf.len(), CONTROL_HEADER_SIZE));
        }

        let message_type = u16::from_be_bytes([buf[0], buf[1]]);
        let length = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        if length as usize > MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(length as usize));
        }

        Ok(Self {
            message_type,
            length,
        })
    }
}

/// A decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Version(proto::Version),
    Authenticate(proto::Authenticate),
    Ping(proto::Ping),
    Reject(proto::Reject),
    ServerSync(proto::ServerSync),
    TextMessage(proto::TextMessage),
    CryptSetup(proto::CryptSetup),
    /// A catalog record this core does not interpret.
    Opaque { kind: MessageType, payload: Bytes },
}

impl ControlMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Version(_) => MessageType::Version,
            Self::Authenticate(_) => MessageType::Authenticate,
            Self::Ping(_) => MessageType::Ping,
            Self::Reject(_) => MessageType::Reject,
            Self::ServerSync(_) => MessageType::ServerSync,
            Self::TextMessage(_) => MessageType::TextMessage,
            Self::CryptSetup(_) => MessageType::CryptSetup,
            Self::Opaque { kind, .. } => *kind,
        }
    }

    /// Decode a payload received under the raw type tag `message_type`.
    pub fn decode(message_type: u16, payload: Bytes) -> Result<Self, ProtocolError> {
        let kind = MessageType::try_from(message_type)?;
        let msg = match kind {
            MessageType::Version => Self::Version(proto::Version::decode(payload)?),
            MessageType::Authenticate => Self::Authenticate(proto::Authenticate::decode(payload)?),
            MessageType::Ping => Self::Ping(proto::Ping::decode(payload)?),
            MessageType::Reject => Self::Reject(proto::Reject::decode(payload)?),
            MessageType::ServerSync => Self::ServerSync(proto::ServerSync::decode(payload)?),
            MessageType::TextMessage => Self::TextMessage(proto::TextMessage::decode(payload)?),
            MessageType::CryptSetup => Self::CryptSetup(proto::CryptSetup::decode(payload)?),
            kind => Self::Opaque { kind, payload },
        };
        Ok(msg)
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::Version(m) => m.encode_to_vec(),
            Self::Authenticate(m) => m.encode_to_vec(),
            Self::Ping(m) => m.encode_to_vec(),
            Self::Reject(m) => m.encode_to_vec(),
            Self::ServerSync(m) => m.encode_to_vec(),
            Self::TextMessage(m) => m.encode_to_vec(),
            Self::CryptSetup(m) => m.encode_to_vec(),
            Self::Opaque { payload, .. } => payload.to_vec(),
        }
    }

    /// Encode as a complete wire frame.
    pub fn to_frame(&self) -> Bytes {
        encode_frame(self.message_type(), &self.encode_payload())
    }
}

/// Build a `[type][length][payload]` frame.
pub fn encode_frame(kind: MessageType, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(CONTROL_HEADER_SIZE + payload.len());
    buf.put_u16(kind as u16);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame,
/// otherwise the message and the number of bytes consumed.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(ControlMessage, usize)>, ProtocolError> {
    if buf.len() < CONTROL_HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::decode(buf)?;
    let total = CONTROL_HEADER_SIZE + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let payload = Bytes::copy_from_slice(&buf[CONTROL_HEADER_SIZE..total]);
    let msg = ControlMessage::decode(header.message_type, payload)?;
    Ok(Some((msg, total)))
}
