//! Key-setup record shapes.
//!
//! The server delivers key material over the control channel in one
//! `CryptSetup` record type, whose populated fields select one of three
//! mutually exclusive meanings.

use std::fmt;

use crate::proto::CryptSetup;
use crate::{ProtocolError, KEY_SIZE, NONCE_SIZE};

#[derive(Clone, PartialEq, Eq)]
pub enum KeySetup {
    /// Fresh session key plus both counter seeds.
    Bootstrap {
        key: [u8; KEY_SIZE],
        outbound: [u8; NONCE_SIZE],
        inbound: [u8; NONCE_SIZE],
    },
    /// New inbound counter state from the server.
    Resync { inbound: [u8; NONCE_SIZE] },
    /// The server asks for our current outbound counter.
    Request,
}

impl KeySetup {
    /// Classify a received record.
    pub fn from_record(record: &CryptSetup) -> Result<Self, ProtocolError> {
        let key = record.key.as_deref().map(to_block).transpose()?;
        let outbound = record.client_nonce.as_deref().map(to_block).transpose()?;
        let inbound = record.server_nonce.as_deref().map(to_block).transpose()?;

        match (key, outbound, inbound) {
            (Some(key), Some(outbound), Some(inbound)) => Ok(Self::Bootstrap {
                key,
                outbound,
                inbound,
            }),
            (None, None, Some(inbound)) => Ok(Self::Resync { inbound }),
            (None, None, None) => Ok(Self::Request),
            (key, outbound, inbound) => Err(ProtocolError::MalformedKeySetup(format!(
                "unexpected field combination (key: {}, client_nonce: {}, server_nonce: {})",
                key.is_some(),
                outbound.is_some(),
                inbound.is_some()
            ))),
        }
    }
}

impl fmt::Debug for KeySetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap { .. } => write!(f, "Bootstrap {{ .. }}"),
            Self::Resync { .. } => write!(f, "Resync {{ .. }}"),
            Self::Request => write!(f, "Request"),
        }
    }
}

/// Record echoing our outbound counter back to the server.
pub fn outbound_echo(outbound: [u8; NONCE_SIZE]) -> CryptSetup {
    CryptSetup {
        key: None,
        client_nonce: Some(outbound.to_vec()),
        server_nonce: None,
    }
}

fn to_block(bytes: &[u8]) -> Result<[u8; 16], ProtocolError> {
    bytes.try_into().map_err(|_| {
        ProtocolError::MalformedKeySetup(format!("expected 16 bytes, got {}", bytes.len()))
    })
}
