//! Murmur voice chat client.
//!
//! A session runs two channels against one server:
//! - a TLS control channel carrying framed protobuf records, and
//! - a UDP voice channel carrying OCB-sealed datagrams.
//!
//! Key material arrives over the control channel; the voice channel is only
//! opened once it has been installed.

#![forbid(unsafe_code)]

pub mod control;
pub mod error;
pub mod session;
pub mod tls;
pub mod types;
pub mod voice;

pub use control::{ControlChannel, ControlSender};
pub use error::ClientError;
pub use session::{Session, SessionHandle};
pub use types::{ClientConfig, ControlState, SessionEvent, VoiceEvent};
pub use voice::VoiceChannel;
