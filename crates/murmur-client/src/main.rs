//! Murmur command-line client.
//!
//! Connects, joins the server and relays stdin lines as text messages.
//! Lines starting with `/` are commands: `/stats`, `/resync`, `/quit`.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use murmur_client::{ClientConfig, Session, SessionEvent, SessionHandle, VoiceEvent};
use murmur_core::DEFAULT_PORT;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

#[derive(Parser, Debug)]
#[command(name = "murmur-client")]
#[command(about = "Murmur voice chat client")]
struct Args {
    /// Server host name or address
    #[arg(long, env = "MURMUR_HOST")]
    host: String,

    #[arg(long, env = "MURMUR_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, short, env = "MURMUR_USER")]
    username: String,

    #[arg(long, env = "MURMUR_PASSWORD")]
    password: Option<String>,

    /// Channel that text messages are sent to
    #[arg(long, default_value_t = 0)]
    channel: u32,

    /// Log level
    #[arg(long, env = "MURMUR_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    murmur_common::init_tracing_with_default(&args.log_level);

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        username: args.username,
        password: args.password,
        channel_id: args.channel,
        ..Default::default()
    };

    let mut session = Session::connect(config).await?;
    if let Some(events) = session.take_voice_events() {
        tokio::spawn(log_voice_events(events));
    }

    let (quit_tx, mut quit_rx) = oneshot::channel();
    tokio::spawn(read_commands(session.handle(), quit_tx));

    let outcome = loop {
        tokio::select! {
            event = session.process_one() => match event {
                Ok(event) => print_event(event),
                Err(err) if err.is_fatal() => break Err(err),
                Err(err) => warn!("{}", err),
            },
            _ = &mut quit_rx => break Ok(()),
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    session.close().await;
    outcome?;
    Ok(())
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::ServerVersion { version, release } => {
            info!(
                "server {} ({}.{}.{})",
                release,
                version >> 16,
                (version >> 8) & 0xff,
                version & 0xff
            );
        }
        SessionEvent::Synced {
            welcome_text,
            session,
            ..
        } => {
            info!("joined as session {:?}", session);
            if let Some(text) = welcome_text {
                println!("{}", text);
            }
        }
        SessionEvent::TextMessage { actor, message } => match actor {
            Some(actor) => println!("[{}] {}", actor, message),
            None => println!("[server] {}", message),
        },
        SessionEvent::ControlPong { rtt_us } => {
            if let Some(rtt) = rtt_us {
                debug!("control rtt {} us", rtt);
            }
        }
        other => debug!("{:?}", other),
    }
}

async fn log_voice_events(mut events: mpsc::Receiver<VoiceEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            VoiceEvent::Pong { rtt_us } => debug!("voice rtt {} us", rtt_us),
            VoiceEvent::Audio { kind, body, .. } => {
                trace!("{:?} audio, {} bytes", kind, body.len())
            }
            VoiceEvent::Closed => break,
        }
    }
}

async fn read_commands(handle: SessionHandle, quit: oneshot::Sender<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin: {}", e);
                break;
            }
        };
        match line.trim() {
            "" => {}
            "/quit" => break,
            "/stats" => match handle.telemetry() {
                Some(stats) => match serde_json::to_string(&stats) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!("stats: {}", e),
                },
                None => println!("voice crypto not established"),
            },
            "/resync" => {
                if let Err(e) = handle.request_resync().await {
                    warn!("resync request failed: {}", e);
                }
            }
            text => {
                if let Err(e) = handle.send_text_message(text).await {
                    warn!("send failed: {}", e);
                    break;
                }
            }
        }
    }
    let _ = quit.send(());
}
