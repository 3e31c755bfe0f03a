use std::time::Duration;

use bytes::Bytes;
use murmur_core::{ControlMessage, UdpMessageKind, DEFAULT_PORT};
use murmur_crypto::nonce_sync::DEFAULT_LATE_WINDOW;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    /// Channel that outgoing text messages are addressed to.
    pub channel_id: u32,
    /// Release name sent in the version record.
    pub release: String,
    pub tls_timeout: Duration,
    pub control_keepalive: Duration,
    pub voice_keepalive: Duration,
    pub late_window: u8,
    /// Ask the server for resync once no voice packet has authenticated for this long.
    pub resync_after: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            channel_id: 0,
            release: format!("murmur {}", env!("CARGO_PKG_VERSION")),
            tls_timeout: Duration::from_secs(2),
            control_keepalive: Duration::from_secs(10),
            voice_keepalive: Duration::from_secs(5),
            late_window: DEFAULT_LATE_WINDOW,
            resync_after: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.host.trim().is_empty() {
            return Err(ClientError::InvalidConfig("host must not be empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(ClientError::InvalidConfig("username must not be empty".into()));
        }
        if self.late_window == 0 || self.late_window > 128 {
            return Err(ClientError::InvalidConfig(format!(
                "late window must be 1-128, got {}",
                self.late_window
            )));
        }
        for (name, period) in [
            ("tls timeout", self.tls_timeout),
            ("control keep-alive", self.control_keepalive),
            ("voice keep-alive", self.voice_keepalive),
        ] {
            if period.is_zero() {
                return Err(ClientError::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

/// Control channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Disconnected,
    /// Transport is being secured, or is secured and awaiting the version record.
    TlsHandshaking,
    VersionExchanged,
    Authenticating,
    Established,
    Closed,
}

/// What one processed control message meant to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ServerVersion {
        version: u32,
        release: String,
    },
    Synced {
        session: Option<u32>,
        welcome_text: Option<String>,
        max_bandwidth: Option<u32>,
    },
    TextMessage {
        actor: Option<u32>,
        message: String,
    },
    /// Voice crypto installed; the voice channel is up.
    KeySetupInstalled,
    /// The server moved our inbound counter.
    InboundResynced,
    /// The server asked for our outbound counter and was answered.
    OutboundNonceSent,
    /// Control keep-alive echoed by the server.
    ControlPong {
        rtt_us: Option<u64>,
    },
    /// A record outside the client core, left for the host to interpret.
    Message(ControlMessage),
}

/// Output of the voice receive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    Pong {
        rtt_us: u64,
    },
    Audio {
        kind: UdpMessageKind,
        target: u8,
        body: Bytes,
    },
    /// The channel was closed; no further events follow.
    Closed,
}
