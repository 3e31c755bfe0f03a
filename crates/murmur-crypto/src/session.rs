//! Packet-level voice encryption.
//!
//! This module combines the OCB engine with nonce synchronization to seal
//! and open voice datagrams.
//!
//! # Wire Format
//!
//! ```text
//! [1 byte: outbound counter byte 0] [3 bytes: tag prefix] [ciphertext]
//! ```

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::nonce_sync::{DecryptError, Nonce, NonceSyncState, Telemetry};
use crate::ocb::OcbEngine;
use murmur_common::constant_time_eq;
use murmur_core::KEY_SIZE;

/// Bytes of header preceding the ciphertext.
pub const HEADER_SIZE: usize = 4;

/// Bytes of the tag carried on the wire.
pub const TRUNCATED_TAG_SIZE: usize = 3;

/// Session encryption errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Seal/open attempted before key material was installed.
    #[error("session not established")]
    NotEstablished,

    #[error("packet rejected: {0}")]
    Rejected(#[from] DecryptError),
}

/// 16-byte session key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_SIZE]);

impl From<[u8; KEY_SIZE]> for SessionKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Voice crypto state for one connection.
#[derive(Debug)]
pub struct CryptoSession {
    engine: OcbEngine,
    nonces: NonceSyncState,
}

impl CryptoSession {
    pub fn new(key: SessionKey, outbound: Nonce, inbound: Nonce) -> Self {
        Self {
            engine: OcbEngine::new(&key.0),
            nonces: NonceSyncState::new(outbound, inbound),
        }
    }

    /// Override the late-packet window (see [`NonceSyncState::with_late_window`]).
    pub fn with_late_window(mut self, window: u8) -> Self {
        self.nonces = self.nonces.with_late_window(window);
        self
    }

    /// Encrypt a payload into a wire datagram.
    pub fn seal(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let nonce = self.nonces.next_outbound();
        let (ciphertext, tag) = self.engine.seal(plaintext, &nonce);

        let mut packet = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        packet.push(nonce[0]);
        packet.extend_from_slice(&tag[..TRUNCATED_TAG_SIZE]);
        packet.extend_from_slice(&ciphertext);
        packet
    }

    /// Decrypt a wire datagram.
    ///
    /// The inbound counter only moves if the packet authenticates.
    pub fn open(&mut self, packet: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if packet.len() < HEADER_SIZE {
            return Err(DecryptError::TooShort(packet.len()));
        }

        let (header, ciphertext) = packet.split_at(HEADER_SIZE);
        let engine = &self.engine;
        let result = self.nonces.accept(header[0], |nonce| {
            let (plaintext, tag) = engine.open(ciphertext, nonce);
            constant_time_eq(&tag[..TRUNCATED_TAG_SIZE], &header[1..]).then_some(plaintext)
        });

        if let Err(err) = &result {
            trace!("dropping voice packet: {}", err);
        }
        result
    }

    pub fn outbound_nonce(&self) -> Nonce {
        self.nonces.outbound()
    }

    pub fn inbound_nonce(&self) -> Nonce {
        self.nonces.inbound()
    }

    /// Apply a resynchronization hint from the peer.
    pub fn set_inbound_nonce(&mut self, inbound: Nonce) {
        self.nonces.set_inbound(inbound);
    }

    pub fn telemetry(&self) -> Telemetry {
        self.nonces.telemetry()
    }

    pub fn record_resync_request(&mut self) {
        self.nonces.record_resync_request();
    }
}

/// Crypto session shared between the voice receive loop, the voice
/// keep-alive timer, and the control channel.
///
/// Empty until key material arrives. Every mutation, including the whole
/// resync/verify/commit sequence of [`CryptoSession::open`], runs under the
/// write lock.
#[derive(Debug, Clone, Default)]
pub struct SharedCryptoSession {
    inner: Arc<RwLock<Option<CryptoSession>>>,
}

impl SharedCryptoSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh session, replacing any previous one.
    pub fn install(&self, session: CryptoSession) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(session);
    }

    pub fn is_established(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.with_mut(|session| session.seal(plaintext))
    }

    pub fn open(&self, packet: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.with_mut(|session| session.open(packet))?
            .map_err(SessionError::from)
    }

    pub fn outbound_nonce(&self) -> Result<Nonce, SessionError> {
        self.with(|session| session.outbound_nonce())
    }

    pub fn inbound_nonce(&self) -> Result<Nonce, SessionError> {
        self.with(|session| session.inbound_nonce())
    }

    pub fn set_inbound_nonce(&self, inbound: Nonce) -> Result<(), SessionError> {
        self.with_mut(|session| session.set_inbound_nonce(inbound))
    }

    pub fn telemetry(&self) -> Result<Telemetry, SessionError> {
        self.with(|session| session.telemetry())
    }

    pub fn record_resync_request(&self) -> Result<(), SessionError> {
        self.with_mut(|session| session.record_resync_request())
    }

    fn with<T>(&self, f: impl FnOnce(&CryptoSession) -> T) -> Result<T, SessionError> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f).ok_or(SessionError::NotEstablished)
    }

    fn with_mut<T>(&self, f: impl FnOnce(&mut CryptoSession) -> T) -> Result<T, SessionError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.as_mut().map(f).ok_or(SessionError::NotEstablished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        let mut key = [0u8; 16];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        SessionKey::from(key)
    }

    /// Sender and receiver whose counters line up.
    fn create_session_pair(seed: Nonce) -> (CryptoSession, CryptoSession) {
        let sender = CryptoSession::new(key(), seed, [0; 16]);
        let receiver = CryptoSession::new(key(), [0; 16], seed);
        (sender, receiver)
    }

    fn seed(low: u8) -> Nonce {
        let mut nonce = [0x11u8; 16];
        nonce[0] = low;
        nonce
    }

    #[test]
    fn test_encrypted_session() {
        let (mut sender, mut receiver) = create_session_pair(seed(0));

        let packet = sender.seal(b"hello over udp");
        assert_eq!(packet.len(), HEADER_SIZE + 14);
        assert_eq!(packet[0], 1);

        let plaintext = receiver.open(&packet).unwrap();
        assert_eq!(plaintext, b"hello over udp");
        assert_eq!(receiver.inbound_nonce(), sender.outbound_nonce());
    }

    #[test]
    fn test_empty_payload() {
        let (mut sender, mut receiver) = create_session_pair(seed(0));
        let packet = sender.seal(&[]);
        assert_eq!(packet.len(), HEADER_SIZE);
        assert!(receiver.open(&packet).unwrap().is_empty());
    }

    #[test]
    fn test_short_packet_rejected() {
        let (_, mut receiver) = create_session_pair(seed(0));
        assert_eq!(receiver.open(&[1, 2, 3]), Err(DecryptError::TooShort(3)));
    }

    #[test]
    fn test_replay_protection() {
        let (mut sender, mut receiver) = create_session_pair(seed(0));
        let first = sender.seal(b"first");
        let second = sender.seal(b"second");

        receiver.open(&first).unwrap();
        receiver.open(&second).unwrap();

        assert_eq!(receiver.open(&first), Err(DecryptError::Replay(1)));
        assert_eq!(receiver.open(&second), Err(DecryptError::Duplicate(2)));
    }

    #[test]
    fn test_loss_and_reordering() {
        let (mut sender, mut receiver) = create_session_pair(seed(4));
        let packets: Vec<Vec<u8>> = (5..=9u8).map(|i| sender.seal(&[i])).collect();

        // 5, 6, 9 arrive; 7 and 8 are lost
        for index in [0usize, 1, 4] {
            receiver.open(&packets[index]).unwrap();
        }
        let telemetry = receiver.telemetry();
        assert_eq!((telemetry.good, telemetry.lost), (3, 2));
        assert_eq!(receiver.inbound_nonce()[0], 9);

        // 7 shows up late and still decrypts to the right bytes
        assert_eq!(receiver.open(&packets[2]).unwrap(), vec![7]);
        assert_eq!(receiver.telemetry().late, 1);
        assert_eq!(receiver.inbound_nonce()[0], 9);
    }

    #[test]
    fn test_tampering_rolls_back_counter() {
        let (mut sender, mut receiver) = create_session_pair(seed(4));
        receiver.open(&sender.seal(b"a")).unwrap();
        receiver.open(&sender.seal(b"b")).unwrap();
        let before = receiver.inbound_nonce();

        let mut forged = sender.seal(b"c");
        forged[1] ^= 0xFF;
        assert_eq!(receiver.open(&forged), Err(DecryptError::TagMismatch));
        assert_eq!(receiver.inbound_nonce(), before);
        assert_eq!(receiver.telemetry().good, 2);
    }

    #[test]
    fn test_outbound_counter_wraps_into_second_byte() {
        let (mut sender, mut receiver) = create_session_pair(seed(0xFE));
        for _ in 0..3 {
            let packet = sender.seal(b"x");
            receiver.open(&packet).unwrap();
        }
        assert_eq!(sender.outbound_nonce()[0], 0x01);
        assert_eq!(sender.outbound_nonce()[1], 0x12);
        assert_eq!(receiver.inbound_nonce(), sender.outbound_nonce());
    }

    #[test]
    fn test_shared_session_requires_install() {
        let shared = SharedCryptoSession::new();
        assert!(!shared.is_established());
        assert!(matches!(shared.seal(b"x"), Err(SessionError::NotEstablished)));
        assert!(matches!(shared.open(&[0; 8]), Err(SessionError::NotEstablished)));
        assert!(matches!(shared.telemetry(), Err(SessionError::NotEstablished)));

        shared.install(CryptoSession::new(key(), seed(0), seed(0)));
        assert!(shared.is_established());
        assert!(shared.seal(b"x").is_ok());
    }

    #[test]
    fn test_shared_session_distinguishes_rejection() {
        let shared = SharedCryptoSession::new();
        shared.install(CryptoSession::new(key(), seed(0), seed(0)));

        let result = shared.open(&[0x01, 0, 0, 0, 0xAA]);
        assert!(matches!(
            result,
            Err(SessionError::Rejected(DecryptError::TagMismatch))
        ));
        assert_eq!(shared.inbound_nonce().unwrap(), seed(0));
    }

    #[test]
    fn test_session_key_debug_is_redacted() {
        assert_eq!(format!("{:?}", key()), "SessionKey(..)");
    }
}
