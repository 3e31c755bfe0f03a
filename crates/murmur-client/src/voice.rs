//! Voice channel: sealed datagrams over UDP.
//!
//! Two tasks run per channel. The receive loop opens every datagram through
//! the shared crypto session and drops rejected ones without a sound; the
//! keep-alive task sends a sealed ping on a fixed period.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use murmur_common::Clock;
use murmur_core::{ControlMessage, VoicePacket, MAX_UDP_PACKET};
use murmur_crypto::{SessionError, SharedCryptoSession};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::control::ControlSender;
use crate::error::ClientError;
use crate::types::{ClientConfig, VoiceEvent};

pub struct VoiceChannel {
    socket: Arc<UdpSocket>,
    crypt: SharedCryptoSession,
    shutdown: watch::Sender<bool>,
    keepalive: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

impl VoiceChannel {
    /// Bind a local socket, connect it to `server` and start both loops.
    ///
    /// `control` carries resync requests when inbound packets stop
    /// authenticating.
    pub async fn open(
        server: SocketAddr,
        crypt: SharedCryptoSession,
        config: &ClientConfig,
        clock: Arc<dyn Clock>,
        control: ControlSender,
        events: mpsc::Sender<VoiceEvent>,
    ) -> Result<Self, ClientError> {
        let bind: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        let socket = Arc::new(socket);
        info!("voice channel {} -> {}", socket.local_addr()?, server);

        let (shutdown, _) = watch::channel(false);

        let receiver = tokio::spawn(receive_loop(ReceiveLoop {
            socket: socket.clone(),
            crypt: crypt.clone(),
            clock: clock.clone(),
            control,
            events,
            resync_after: config.resync_after,
            shutdown: shutdown.subscribe(),
        }));
        let keepalive = tokio::spawn(keepalive_loop(
            socket.clone(),
            crypt.clone(),
            clock,
            config.voice_keepalive,
            shutdown.subscribe(),
        ));

        Ok(Self {
            socket,
            crypt,
            shutdown,
            keepalive,
            receiver,
        })
    }

    /// Seal and send one packet.
    pub async fn send(&self, packet: &VoicePacket) -> Result<(), ClientError> {
        let sealed = self.crypt.seal(&packet.encode())?;
        self.socket.send(&sealed).await?;
        Ok(())
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn is_running(&self) -> bool {
        !self.receiver.is_finished()
    }

    /// Stop both loops. The receive loop emits [`VoiceEvent::Closed`] on its
    /// way out.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
        self.keepalive.abort();
    }
}

impl Drop for VoiceChannel {
    fn drop(&mut self) {
        self.close();
    }
}

struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    crypt: SharedCryptoSession,
    clock: Arc<dyn Clock>,
    control: ControlSender,
    events: mpsc::Sender<VoiceEvent>,
    resync_after: Duration,
    shutdown: watch::Receiver<bool>,
}

async fn receive_loop(mut ctx: ReceiveLoop) {
    let mut buf = vec![0u8; MAX_UDP_PACKET];
    let mut last_good = Instant::now();
    let mut last_request: Option<Instant> = None;

    loop {
        let len = tokio::select! {
            _ = ctx.shutdown.changed() => break,
            recv = ctx.socket.recv(&mut buf) => match recv {
                Ok(len) => len,
                Err(e) => {
                    debug!("voice recv: {}", e);
                    continue;
                }
            },
        };

        let plain = match ctx.crypt.open(&buf[..len]) {
            Ok(plain) => plain,
            Err(SessionError::Rejected(reason)) => {
                trace!("dropped voice packet: {}", reason);
                let stale = last_good.elapsed() >= ctx.resync_after;
                let due = last_request.map_or(true, |at| at.elapsed() >= ctx.resync_after);
                if stale && due {
                    last_request = Some(Instant::now());
                    if let Err(e) = request_resync(&ctx.control, &ctx.crypt).await {
                        warn!("resync request failed: {}", e);
                    }
                }
                continue;
            }
            Err(SessionError::NotEstablished) => {
                error!("voice channel running without key material");
                break;
            }
        };
        last_good = Instant::now();

        let event = match VoicePacket::decode(&plain) {
            Ok(VoicePacket::Ping { timestamp }) => VoiceEvent::Pong {
                rtt_us: ctx.clock.now_us().saturating_sub(timestamp),
            },
            Ok(VoicePacket::Audio { kind, target, body }) => {
                VoiceEvent::Audio { kind, target, body }
            }
            Err(e) => {
                debug!("undecodable voice payload: {}", e);
                continue;
            }
        };
        if ctx.events.try_send(event).is_err() {
            trace!("voice event dropped, consumer behind");
        }
    }

    let _ = ctx.events.send(VoiceEvent::Closed).await;
    debug!("voice receive loop stopped");
}

async fn keepalive_loop(
    socket: Arc<UdpSocket>,
    crypt: SharedCryptoSession,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        let ping = VoicePacket::Ping {
            timestamp: clock.now_us(),
        };
        let sealed = match crypt.seal(&ping.encode()) {
            Ok(sealed) => sealed,
            Err(e) => {
                error!("voice keep-alive: {}", e);
                break;
            }
        };
        if let Err(e) = socket.send(&sealed).await {
            debug!("voice keep-alive send: {}", e);
        }
    }
}

/// Ask the server to resend our inbound counter state, and count the request.
pub async fn request_resync(
    control: &ControlSender,
    crypt: &SharedCryptoSession,
) -> Result<(), ClientError> {
    control
        .send(&ControlMessage::CryptSetup(Default::default()))
        .await?;
    crypt.record_resync_request()?;
    debug!("requested voice crypto resync");
    Ok(())
}
