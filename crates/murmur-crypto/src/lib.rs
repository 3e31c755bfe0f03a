//! Cryptographic transport for Murmur voice packets.
//!
//! This crate provides:
//! - A single-block AES-128 wrapper behind the [`BlockCipher`] seam
//! - OCB authenticated encryption built directly on that block cipher
//! - Inbound nonce resynchronization with replay detection and loss telemetry
//! - Packet-level sealing/opening with the 4-byte voice header
//!
//! # Design
//!
//! Each voice datagram carries only the low byte of the sender's 16-byte
//! counter. The receiver reconstructs the remaining bytes from its own
//! inbound counter, tolerating loss, reordering, and wraparound. Every
//! speculative counter edit made while reconstructing is committed only
//! if the packet authenticates, and is rolled back otherwise.

#![forbid(unsafe_code)]

pub mod block;
pub mod nonce_sync;
pub mod ocb;
pub mod session;

pub use block::{AesBlockCipher, BlockCipher, BLOCK_SIZE};
pub use nonce_sync::{DecryptError, NonceSyncState, Telemetry};
pub use ocb::OcbEngine;
pub use session::{CryptoSession, SessionError, SessionKey, SharedCryptoSession};
