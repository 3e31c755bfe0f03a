//! Session orchestration.
//!
//! [`Session`] owns the control channel and drives it one record at a time.
//! Key-setup records install or adjust the shared voice crypto and bring
//! the voice channel up on first install.

use std::net::SocketAddr;
use std::sync::Arc;

use murmur_common::{Clock, SystemClock};
use murmur_core::key_setup::outbound_echo;
use murmur_core::proto::{self, CryptSetup};
use murmur_core::{ControlMessage, KeySetup, VoicePacket};
use murmur_crypto::{CryptoSession, SessionKey, SharedCryptoSession, Telemetry};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::control::{spawn_keepalive, ControlChannel, ControlSender};
use crate::error::ClientError;
use crate::types::{ClientConfig, ControlState, SessionEvent, VoiceEvent};
use crate::voice::{self, VoiceChannel};

const VOICE_EVENT_CAPACITY: usize = 256;

pub struct Session {
    config: ClientConfig,
    control: ControlChannel,
    crypt: SharedCryptoSession,
    clock: Arc<dyn Clock>,
    voice_addr: SocketAddr,
    voice: Option<VoiceChannel>,
    voice_tx: mpsc::Sender<VoiceEvent>,
    voice_rx: Option<mpsc::Receiver<VoiceEvent>>,
    keepalive: JoinHandle<()>,
}

impl Session {
    /// Resolve the server, open the secured control channel and send the
    /// version and credentials.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let addr = net::lookup_host((config.host.as_str(), config.port))
            .await?
            .next()
            .ok_or_else(|| {
                ClientError::InvalidConfig(format!("{} did not resolve", config.host))
            })?;
        info!("connecting to {} ({})", config.host, addr);

        let control = ControlChannel::connect(&config, addr).await?;
        Self::start(control, addr, config, Arc::new(SystemClock)).await
    }

    /// Run a session over an already secured stream. Voice datagrams go to
    /// `voice_addr`.
    pub async fn with_stream<S>(
        stream: S,
        voice_addr: SocketAddr,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        Self::start(ControlChannel::from_stream(stream), voice_addr, config, clock).await
    }

    async fn start(
        mut control: ControlChannel,
        voice_addr: SocketAddr,
        config: ClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ClientError> {
        control
            .handshake(&config.username, config.password.as_deref(), &config.release)
            .await?;

        let crypt = SharedCryptoSession::new();
        let keepalive = spawn_keepalive(
            control.sender(),
            crypt.clone(),
            clock.clone(),
            config.control_keepalive,
        );
        let (voice_tx, voice_rx) = mpsc::channel(VOICE_EVENT_CAPACITY);

        Ok(Self {
            config,
            control,
            crypt,
            clock,
            voice_addr,
            voice: None,
            voice_tx,
            voice_rx: Some(voice_rx),
            keepalive,
        })
    }

    /// Process the next control record.
    ///
    /// Errors other than [`ClientError::Crypto`] end the session: the
    /// control channel is closed and voice is torn down before returning.
    pub async fn process_one(&mut self) -> Result<SessionEvent, ClientError> {
        let result = match self.control.process_one().await {
            Ok(msg) => self.dispatch(msg).await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                error!("session ended: {}", err);
                self.teardown();
                self.control.close().await;
            }
        }
        result
    }

    async fn dispatch(&mut self, msg: ControlMessage) -> Result<SessionEvent, ClientError> {
        let event = match msg {
            ControlMessage::CryptSetup(record) => self.apply_key_setup(&record).await?,
            ControlMessage::ServerSync(sync) => {
                info!("synchronized, session {:?}", sync.session);
                SessionEvent::Synced {
                    session: sync.session,
                    welcome_text: sync.welcome_text,
                    max_bandwidth: sync.max_bandwidth,
                }
            }
            ControlMessage::Version(version) => SessionEvent::ServerVersion {
                version: version.version.unwrap_or_default(),
                release: version.release.unwrap_or_default(),
            },
            ControlMessage::TextMessage(text) => SessionEvent::TextMessage {
                actor: text.actor,
                message: text.message,
            },
            ControlMessage::Ping(ping) => SessionEvent::ControlPong {
                rtt_us: ping
                    .timestamp
                    .map(|sent| self.clock.now_us().saturating_sub(sent)),
            },
            other => SessionEvent::Message(other),
        };
        Ok(event)
    }

    async fn apply_key_setup(&mut self, record: &CryptSetup) -> Result<SessionEvent, ClientError> {
        match KeySetup::from_record(record)? {
            KeySetup::Bootstrap {
                key,
                outbound,
                inbound,
            } => {
                let session = CryptoSession::new(SessionKey::from(key), outbound, inbound)
                    .with_late_window(self.config.late_window);
                self.crypt.install(session);
                self.control
                    .sender()
                    .send(&ControlMessage::CryptSetup(outbound_echo(outbound)))
                    .await?;

                if self.voice.is_none() {
                    let channel = VoiceChannel::open(
                        self.voice_addr,
                        self.crypt.clone(),
                        &self.config,
                        self.clock.clone(),
                        self.control.sender(),
                        self.voice_tx.clone(),
                    )
                    .await?;
                    self.voice = Some(channel);
                }
                info!("voice crypto installed");
                Ok(SessionEvent::KeySetupInstalled)
            }
            KeySetup::Resync { inbound } => {
                self.crypt.set_inbound_nonce(inbound)?;
                debug!("inbound counter resynchronized");
                Ok(SessionEvent::InboundResynced)
            }
            KeySetup::Request => {
                let outbound = self.crypt.outbound_nonce()?;
                self.control
                    .sender()
                    .send(&ControlMessage::CryptSetup(outbound_echo(outbound)))
                    .await?;
                debug!("sent outbound counter on request");
                Ok(SessionEvent::OutboundNonceSent)
            }
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            control: self.control.sender(),
            crypt: self.crypt.clone(),
            channel_id: self.config.channel_id,
        }
    }

    pub fn state(&self) -> ControlState {
        self.control.state()
    }

    pub fn crypto(&self) -> &SharedCryptoSession {
        &self.crypt
    }

    pub fn is_voice_active(&self) -> bool {
        self.voice.as_ref().is_some_and(VoiceChannel::is_running)
    }

    /// Voice events; available once.
    pub fn take_voice_events(&mut self) -> Option<mpsc::Receiver<VoiceEvent>> {
        self.voice_rx.take()
    }

    pub async fn send_voice(&self, packet: &VoicePacket) -> Result<(), ClientError> {
        match &self.voice {
            Some(voice) => voice.send(packet).await,
            None => Err(ClientError::Crypto(murmur_crypto::SessionError::NotEstablished)),
        }
    }

    pub async fn close(mut self) {
        self.teardown();
        self.control.close().await;
        info!("session closed");
    }

    fn teardown(&mut self) {
        self.keepalive.abort();
        if let Some(voice) = self.voice.take() {
            voice.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Cloneable handle for sending on behalf of a running session.
#[derive(Clone)]
pub struct SessionHandle {
    control: ControlSender,
    crypt: SharedCryptoSession,
    channel_id: u32,
}

impl SessionHandle {
    /// Send a chat message to the configured channel.
    pub async fn send_text_message(&self, text: &str) -> Result<(), ClientError> {
        if self.control.state() != ControlState::Established {
            warn!("sending text before the session is established");
        }
        let msg = proto::TextMessage {
            channel_id: vec![self.channel_id],
            message: text.to_string(),
            ..Default::default()
        };
        self.control.send(&ControlMessage::TextMessage(msg)).await
    }

    pub async fn request_resync(&self) -> Result<(), ClientError> {
        voice::request_resync(&self.control, &self.crypt).await
    }

    /// Voice crypto statistics, `None` before key setup.
    pub fn telemetry(&self) -> Option<Telemetry> {
        self.crypt.telemetry().ok()
    }

    pub fn state(&self) -> ControlState {
        self.control.state()
    }
}
