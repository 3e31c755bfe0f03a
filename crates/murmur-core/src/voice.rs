//! Voice datagram payloads.
//!
//! After decryption the first byte of a voice payload is a header whose top
//! three bits select the packet kind and whose low five bits carry the
//! voice target. Pings carry a varint timestamp that the server echoes back.
//!
//! ```text
//! +-----------+-----------+------------------------+
//! | kind (3b) | target(5b)| body                   |
//! +-----------+-----------+------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UdpMessageKind {
    CeltAlpha = 0,
    Ping = 1,
    Speex = 2,
    CeltBeta = 3,
    Opus = 4,
}

impl UdpMessageKind {
    /// Classify a payload by the top three bits of its first byte.
    pub fn classify(header: u8) -> Result<Self, ProtocolError> {
        match header >> 5 {
            0 => Ok(Self::CeltAlpha),
            1 => Ok(Self::Ping),
            2 => Ok(Self::Speex),
            3 => Ok(Self::CeltBeta),
            4 => Ok(Self::Opus),
            other => Err(ProtocolError::UnknownVoiceType(other)),
        }
    }

    pub fn header(self, target: u8) -> u8 {
        ((self as u8) << 5) | (target & 0x1f)
    }
}

/// A decrypted voice-channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoicePacket {
    Ping {
        timestamp: u64,
    },
    /// Encoded audio; the codec framing is left to the audio layer.
    Audio {
        kind: UdpMessageKind,
        target: u8,
        body: Bytes,
    },
}

impl VoicePacket {
    pub fn decode(plain: &[u8]) -> Result<Self, ProtocolError> {
        let (&header, body) = plain
            .split_first()
            .ok_or(ProtocolError::TooShort(0, 1))?;

        match UdpMessageKind::classify(header)? {
            UdpMessageKind::Ping => {
                let (timestamp, _) = read_varint(body)?;
                Ok(Self::Ping { timestamp })
            }
            kind => Ok(Self::Audio {
                kind,
                target: header & 0x1f,
                body: Bytes::copy_from_slice(body),
            }),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        match self {
            Self::Ping { timestamp } => {
                buf.put_u8(UdpMessageKind::Ping.header(0));
                write_varint(&mut buf, *timestamp);
            }
            Self::Audio { kind, target, body } => {
                buf.put_u8(kind.header(*target));
                buf.put_slice(body);
            }
        }
        buf.freeze()
    }
}

/// Append a non-negative value in the protocol's prefix varint encoding.
pub fn write_varint(buf: &mut BytesMut, value: u64) {
    if value < 0x80 {
        buf.put_u8(value as u8);
    } else if value < 0x4000 {
        buf.put_u8(((value >> 8) as u8) | 0x80);
        buf.put_u8(value as u8);
    } else if value < 0x20_0000 {
        buf.put_u8(((value >> 16) as u8) | 0xC0);
        buf.put_u16(value as u16);
    } else if value < 0x1000_0000 {
        buf.put_u8(((value >> 24) as u8) | 0xE0);
        buf.put_u8((value >> 16) as u8);
        buf.put_u16(value as u16);
    } else if value <= u32::MAX as u64 {
        buf.put_u8(0xF0);
        buf.put_u32(value as u32);
    } else {
        buf.put_u8(0xF4);
        buf.put_u64(value);
    }
}

/// Read a non-negative varint, returning the value and bytes consumed.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize), ProtocolError> {
    let first = *buf.first().ok_or(ProtocolError::MalformedVarint)?;
    let need = |n: usize| {
        if buf.len() < n {
            Err(ProtocolError::MalformedVarint)
        } else {
            Ok(())
        }
    };
    let be = |bytes: &[u8]| bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);

    if first & 0x80 == 0 {
        Ok((first as u64, 1))
    } else if first & 0xC0 == 0x80 {
        need(2)?;
        Ok((((first & 0x3F) as u64) << 8 | buf[1] as u64, 2))
    } else if first & 0xE0 == 0xC0 {
        need(3)?;
        Ok((((first & 0x1F) as u64) << 16 | be(&buf[1..3]), 3))
    } else if first & 0xF0 == 0xE0 {
        need(4)?;
        Ok((((first & 0x0F) as u64) << 24 | be(&buf[1..4]), 4))
    } else if first & 0xFC == 0xF0 {
        need(5)?;
        Ok((be(&buf[1..5]), 5))
    } else if first & 0xFC == 0xF4 {
        need(9)?;
        Ok((be(&buf[1..9]), 9))
    } else {
        // Negative encodings never appear in the fields this client reads.
        Err(ProtocolError::MalformedVarint)
    }
}
