//! Control channel: framed protobuf records over a secured stream.
//!
//! Reading is owned by [`ControlChannel`]; writing goes through
//! [`ControlSender`], which any task may clone. Frames are written whole
//! under one lock so concurrent senders never interleave.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use murmur_common::Clock;
use murmur_core::proto;
use murmur_core::{ControlMessage, FrameHeader, CONTROL_HEADER_SIZE, PROTOCOL_VERSION};
use murmur_crypto::SharedCryptoSession;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use crate::error::ClientError;
use crate::tls;
use crate::types::{ClientConfig, ControlState};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct ControlChannel {
    reader: BoxedReader,
    sender: ControlSender,
    state: watch::Sender<ControlState>,
}

impl ControlChannel {
    /// Open TCP to `addr` and secure it. The TLS handshake must finish
    /// within `config.tls_timeout`.
    pub async fn connect(config: &ClientConfig, addr: SocketAddr) -> Result<Self, ClientError> {
        let (state, _) = watch::channel(ControlState::Disconnected);

        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true)?;
        state.send_replace(ControlState::TlsHandshaking);
        debug!("TCP connected to {}, starting TLS", addr);

        let connector = tls::connector()?;
        let name = tls::server_name(&config.host)?;
        let stream = match time::timeout(config.tls_timeout, connector.connect(name, tcp)).await {
            Ok(stream) => stream?,
            Err(_) => {
                state.send_replace(ControlState::Closed);
                error!(
                    "TLS handshake with {} did not finish within {:?}",
                    addr, config.tls_timeout
                );
                return Err(ClientError::TlsTimeout(config.tls_timeout));
            }
        };
        info!("TLS established with {}", addr);

        Ok(Self::with_state(stream, state))
    }

    /// Wrap a stream that is already secured.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (state, _) = watch::channel(ControlState::TlsHandshaking);
        Self::with_state(stream, state)
    }

    fn with_state<S>(stream: S, state: watch::Sender<ControlState>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        let sender = ControlSender {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            state: state.subscribe(),
        };
        Self {
            reader: Box::new(reader),
            sender,
            state,
        }
    }

    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControlState> {
        self.state.subscribe()
    }

    pub fn sender(&self) -> ControlSender {
        self.sender.clone()
    }

    /// Send the version record followed by credentials.
    pub async fn handshake(
        &mut self,
        username: &str,
        password: Option<&str>,
        release: &str,
    ) -> Result<(), ClientError> {
        let version = proto::Version {
            version: Some(PROTOCOL_VERSION),
            release: Some(release.to_string()),
            os: Some(std::env::consts::OS.to_string()),
            os_version: None,
        };
        if let Err(err) = self.sender.send(&ControlMessage::Version(version)).await {
            self.set_state(ControlState::Closed);
            return Err(err);
        }
        self.set_state(ControlState::VersionExchanged);

        let auth = proto::Authenticate {
            username: Some(username.to_string()),
            password: password.map(str::to_string),
            opus: Some(true),
            ..Default::default()
        };
        if let Err(err) = self.sender.send(&ControlMessage::Authenticate(auth)).await {
            self.set_state(ControlState::Closed);
            return Err(err);
        }
        self.set_state(ControlState::Authenticating);
        debug!("sent credentials for {}", username);
        Ok(())
    }

    /// Read and decode the next record, applying its state transition.
    ///
    /// A rejection, an unknown type tag, a malformed frame and EOF all close
    /// the channel and return an error.
    pub async fn process_one(&mut self) -> Result<ControlMessage, ClientError> {
        let msg = match self.read_message().await {
            Ok(msg) => msg,
            Err(err) => {
                self.set_state(ControlState::Closed);
                return Err(err);
            }
        };

        match &msg {
            ControlMessage::ServerSync(_) => {
                if self.state() != ControlState::Established {
                    info!("control channel established");
                }
                self.set_state(ControlState::Established);
            }
            ControlMessage::Reject(reject) => {
                self.set_state(ControlState::Closed);
                let err = ClientError::Rejected {
                    kind: reject.kind(),
                    reason: reject.reason.clone().unwrap_or_default(),
                };
                error!("{}", err);
                return Err(err);
            }
            other => trace!("control message {:?}", other.message_type()),
        }
        Ok(msg)
    }

    async fn read_message(&mut self) -> Result<ControlMessage, ClientError> {
        let mut header = [0u8; CONTROL_HEADER_SIZE];
        self.reader
            .read_exact(&mut header)
            .await
            .map_err(eof_as_closed)?;
        let header = FrameHeader::decode(&header)?;

        let mut payload = vec![0u8; header.length as usize];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(eof_as_closed)?;

        match ControlMessage::decode(header.message_type, Bytes::from(payload)) {
            Ok(msg) => Ok(msg),
            Err(err) => {
                let err = ClientError::from(err);
                error!("dropping control channel: {}", err);
                Err(err)
            }
        }
    }

    pub async fn close(&mut self) {
        self.set_state(ControlState::Closed);
        self.sender.shutdown().await;
    }

    fn set_state(&self, next: ControlState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("control state {:?} -> {:?}", prev, next);
        }
    }
}

fn eof_as_closed(err: io::Error) -> ClientError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ClientError::Closed
    } else {
        ClientError::Io(err)
    }
}

/// Cloneable write side of a control channel.
#[derive(Clone)]
pub struct ControlSender {
    writer: Arc<Mutex<BoxedWriter>>,
    state: watch::Receiver<ControlState>,
}

impl ControlSender {
    pub async fn send(&self, msg: &ControlMessage) -> Result<(), ClientError> {
        let frame = msg.to_frame();
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    pub fn state(&self) -> ControlState {
        *self.state.borrow()
    }

    async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("control shutdown: {}", e);
        }
    }
}

/// Keep-alive ping with the voice crypto statistics when they exist.
pub fn keepalive_ping(clock: &dyn Clock, crypt: &SharedCryptoSession) -> proto::Ping {
    let mut ping = proto::Ping {
        timestamp: Some(clock.now_us()),
        ..Default::default()
    };
    if let Ok(stats) = crypt.telemetry() {
        ping.good = Some(stats.good);
        ping.late = Some(stats.late);
        ping.lost = Some(stats.lost);
        ping.resync = Some(stats.resync);
    }
    ping
}

/// Send a keep-alive every `period` while the channel is established.
/// Ends once the channel closes or a send fails.
pub fn spawn_keepalive(
    sender: ControlSender,
    crypt: SharedCryptoSession,
    clock: Arc<dyn Clock>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            match sender.state() {
                ControlState::Established => {}
                ControlState::Closed => break,
                _ => continue,
            }
            let ping = keepalive_ping(clock.as_ref(), &crypt);
            if let Err(e) = sender.send(&ControlMessage::Ping(ping)).await {
                warn!("control keep-alive failed: {}", e);
                break;
            }
        }
        debug!("control keep-alive stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_common::ManualClock;
    use murmur_core::decode_frame;
    use murmur_crypto::{CryptoSession, SessionKey};

    #[test]
    fn test_keepalive_ping_without_crypto() {
        let clock = ManualClock::new(1_500);
        let ping = keepalive_ping(&clock, &SharedCryptoSession::new());
        assert_eq!(ping.timestamp, Some(1_500));
        assert_eq!(ping.good, None);
        assert_eq!(ping.lost, None);
    }

    #[test]
    fn test_keepalive_ping_carries_telemetry() {
        let crypt = SharedCryptoSession::new();
        crypt.install(CryptoSession::new(
            SessionKey::from([3u8; 16]),
            [0u8; 16],
            [0u8; 16],
        ));
        crypt.record_resync_request().unwrap();

        let ping = keepalive_ping(&ManualClock::new(0), &crypt);
        assert_eq!(ping.good, Some(0));
        assert_eq!(ping.resync, Some(1));
    }

    #[tokio::test]
    async fn test_handshake_order_and_states() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut channel = ControlChannel::from_stream(client);
        assert_eq!(channel.state(), ControlState::TlsHandshaking);

        channel.handshake("alice", Some("secret"), "test").await.unwrap();
        assert_eq!(channel.state(), ControlState::Authenticating);

        let mut buf = vec![0u8; 4096];
        let mut filled = 0;
        let mut msgs = Vec::new();
        while msgs.len() < 2 {
            filled += server.read(&mut buf[filled..]).await.unwrap();
            while let Some((msg, used)) = decode_frame(&buf[..filled]).unwrap() {
                msgs.push(msg);
                buf.copy_within(used..filled, 0);
                filled -= used;
            }
        }

        match &msgs[0] {
            ControlMessage::Version(v) => assert_eq!(v.version, Some(PROTOCOL_VERSION)),
            other => panic!("expected version, got {other:?}"),
        }
        match &msgs[1] {
            ControlMessage::Authenticate(a) => {
                assert_eq!(a.username.as_deref(), Some("alice"));
                assert_eq!(a.password.as_deref(), Some("secret"));
            }
            other => panic!("expected authenticate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_eof_closes() {
        let (client, server) = tokio::io::duplex(64);
        let mut channel = ControlChannel::from_stream(client);
        drop(server);

        assert!(matches!(
            channel.process_one().await,
            Err(ClientError::Closed)
        ));
        assert_eq!(channel.state(), ControlState::Closed);
    }
}
