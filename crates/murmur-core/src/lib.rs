//! Core Murmur protocol types, framing, and constants.
//!
//! This crate provides:
//! - The control message catalog and its `[type][length][payload]` framing
//! - Protobuf records for the messages the client core interprets
//! - Key-setup record shapes delivered over the control channel
//! - Voice datagram classification and the varint ping codec

#![forbid(unsafe_code)]

pub mod control;
pub mod key_setup;
pub mod proto;
pub mod voice;

pub use control::{decode_frame, encode_frame, ControlMessage, FrameHeader, MessageType};
pub use key_setup::KeySetup;
pub use voice::{UdpMessageKind, VoicePacket};

/// Protocol version advertised in the `Version` record (1.2.5).
pub const PROTOCOL_VERSION: u32 = (1 << 16) | (2 << 8) | 5;

/// Default server port for both the control and the voice channel.
pub const DEFAULT_PORT: u16 = 64738;

/// Size of the session key and of each per-direction nonce.
pub const KEY_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 16;

/// Control frame header: `[type u16 BE][length u32 BE]`.
pub const CONTROL_HEADER_SIZE: usize = 6;

/// Largest control payload accepted from the network.
pub const MAX_CONTROL_PAYLOAD: usize = 0x7f_ffff;

/// Largest voice datagram read from the socket.
pub const MAX_UDP_PACKET: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("packet too short: {0} bytes, minimum {1}")]
    TooShort(usize, usize),
    #[error("control payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("unknown message type: {0}")]
    UnknownMessageType(u16),
    #[error("unknown voice packet type: {0}")]
    UnknownVoiceType(u8),
    #[error("protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
    #[error("malformed key setup: {0}")]
    MalformedKeySetup(String),
    #[error("malformed varint")]
    MalformedVarint,
}
