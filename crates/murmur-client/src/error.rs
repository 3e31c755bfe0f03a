//! Client error types.

use std::time::Duration;

use murmur_core::proto::RejectType;
use murmur_core::ProtocolError;
use murmur_crypto::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("TLS handshake timed out after {0:?}")]
    TlsTimeout(Duration),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server rejected connection ({kind:?}): {reason}")]
    Rejected { kind: RejectType, reason: String },

    #[error("unknown control message type: {0}")]
    UnknownMessageType(u16),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    /// Voice crypto used before key setup; a caller bug, not packet loss.
    #[error("crypto error: {0}")]
    Crypto(#[from] SessionError),

    #[error("connection closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Whether the error ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Crypto(_) | Self::InvalidConfig(_))
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownMessageType(kind) => Self::UnknownMessageType(kind),
            other => Self::Protocol(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_keeps_its_tag() {
        let err = ClientError::from(ProtocolError::UnknownMessageType(77));
        assert!(matches!(err, ClientError::UnknownMessageType(77)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_contract_errors_are_not_fatal() {
        assert!(!ClientError::Crypto(SessionError::NotEstablished).is_fatal());
        assert!(ClientError::TlsTimeout(Duration::from_secs(2)).is_fatal());
        assert!(ClientError::Closed.is_fatal());
    }
}
