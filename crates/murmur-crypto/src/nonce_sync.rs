//! Per-direction nonce counters and inbound resynchronization.
//!
//! Voice packets carry only byte 0 of the sender's 16-byte counter. The
//! receiver reconstructs bytes 1..16 from its own inbound counter:
//!
//! - the next expected low byte advances the counter (carrying on wrap)
//! - a low byte a little behind is a late packet, decrypted at its old
//!   position without moving the counter back
//! - a low byte ahead is a forward jump over lost packets
//! - anything else cannot be placed and is rejected
//!
//! # Replay
//!
//! A 256-entry history records, per low byte, the second counter byte at
//! the last successful decryption. A reconstructed out-of-order counter
//! whose second byte matches the history is a replay.
//!
//! # Atomicity
//!
//! [`NonceSyncState::accept`] edits the inbound counter speculatively,
//! runs the caller's authentication step, and then either commits or
//! restores the saved counter. It takes `&mut self`, so a caller holding
//! the state behind a lock gets the whole sequence as one unit.

use serde::Serialize;
use thiserror::Error;

use murmur_core::NONCE_SIZE;

/// Default bound on how far behind a late packet may be.
pub const DEFAULT_LATE_WINDOW: u8 = 30;

pub type Nonce = [u8; NONCE_SIZE];

/// Reasons an inbound packet is dropped. Expected under normal loss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("duplicate of current counter: {0:#04x}")]
    Duplicate(u8),

    #[error("counter byte {0:#04x} cannot be placed")]
    OutOfWindow(u8),

    #[error("replay detected: counter byte {0:#04x}")]
    Replay(u8),

    #[error("authentication tag mismatch")]
    TagMismatch,
}

/// Observational counters. Never gate acceptance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    pub good: u32,
    pub late: u32,
    pub lost: u32,
    pub resync: u32,
}

/// Outbound counter plus inbound counter, replay history and telemetry.
#[derive(Debug, Clone)]
pub struct NonceSyncState {
    outbound: Nonce,
    inbound: Nonce,
    /// Second counter byte at the last good decryption, per low byte.
    history: [Option<u8>; 256],
    telemetry: Telemetry,
    late_window: u8,
}

/// Speculative edit awaiting authentication.
struct Pending {
    saved: Nonce,
    restore: bool,
    late: u32,
    lost: i32,
}

impl NonceSyncState {
    pub fn new(outbound: Nonce, inbound: Nonce) -> Self {
        Self {
            outbound,
            inbound,
            history: [None; 256],
            telemetry: Telemetry::default(),
            late_window: DEFAULT_LATE_WINDOW,
        }
    }

    /// Override the late-packet window.
    ///
    /// # Panics
    /// Panics if `window` is 0 or greater than 128.
    pub fn with_late_window(mut self, window: u8) -> Self {
        assert!(window > 0 && window <= 128, "late window must be 1-128");
        self.late_window = window;
        self
    }

    /// Advance the outbound counter and return the value to seal with.
    pub fn next_outbound(&mut self) -> Nonce {
        increment_from(&mut self.outbound, 0);
        self.outbound
    }

    pub fn outbound(&self) -> Nonce {
        self.outbound
    }

    pub fn inbound(&self) -> Nonce {
        self.inbound
    }

    /// Replace the inbound counter with state supplied by the peer.
    pub fn set_inbound(&mut self, inbound: Nonce) {
        self.inbound = inbound;
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    pub fn record_resync_request(&mut self) {
        self.telemetry.resync = self.telemetry.resync.wrapping_add(1);
    }

    /// Reconstruct the inbound counter for `received`, then authenticate.
    ///
    /// `verify` receives the candidate counter and returns `Some` only if
    /// the packet authenticated under it. The counter edit is kept on
    /// success (unless the packet was late) and undone on any failure.
    pub fn accept<T, F>(&mut self, received: u8, verify: F) -> Result<T, DecryptError>
    where
        F: FnOnce(&Nonce) -> Option<T>,
    {
        let pending = self.resolve(received)?;

        let Some(value) = verify(&self.inbound) else {
            self.inbound = pending.saved;
            return Err(DecryptError::TagMismatch);
        };

        self.history[self.inbound[0] as usize] = Some(self.inbound[1]);
        if pending.restore {
            self.inbound = pending.saved;
        }

        self.telemetry.good = self.telemetry.good.wrapping_add(1);
        self.telemetry.late = self.telemetry.late.wrapping_add(pending.late);
        self.telemetry.lost = self.telemetry.lost.saturating_add_signed(pending.lost);

        Ok(value)
    }

    /// Speculatively move the inbound counter to where `received` belongs.
    /// Leaves the counter untouched when it returns an error.
    fn resolve(&mut self, received: u8) -> Result<Pending, DecryptError> {
        let saved = self.inbound;
        let current = self.inbound[0];
        let mut pending = Pending {
            saved,
            restore: false,
            late: 0,
            lost: 0,
        };

        if current.wrapping_add(1) == received {
            // In order.
            if received > current {
                self.inbound[0] = received;
            } else if received < current {
                self.inbound[0] = received;
                increment_from(&mut self.inbound, 1);
            } else {
                return Err(DecryptError::Duplicate(received));
            }
            return Ok(pending);
        }

        let mut diff = received as i32 - current as i32;
        if diff > 128 {
            diff -= 256;
        } else if diff < -128 {
            diff += 256;
        }
        let window = -(self.late_window as i32);

        if received < current && diff > window && diff < 0 {
            // Late, same wrap.
            pending.late = 1;
            pending.lost = -1;
            pending.restore = true;
            self.inbound[0] = received;
        } else if received > current && diff > window && diff < 0 {
            // Late, from before the last wrap.
            pending.late = 1;
            pending.lost = -1;
            pending.restore = true;
            self.inbound[0] = received;
            decrement_from(&mut self.inbound, 1);
        } else if received > current && diff > 0 {
            pending.lost = received as i32 - current as i32 - 1;
            self.inbound[0] = received;
        } else if received < current && diff > 0 {
            pending.lost = 256 - current as i32 + received as i32 - 1;
            self.inbound[0] = received;
            increment_from(&mut self.inbound, 1);
        } else if diff == 0 {
            return Err(DecryptError::Duplicate(received));
        } else {
            return Err(DecryptError::OutOfWindow(received));
        }

        if self.history[self.inbound[0] as usize] == Some(self.inbound[1]) {
            self.inbound = saved;
            return Err(DecryptError::Replay(received));
        }

        Ok(pending)
    }
}

/// Add one at `counter[start]`, carrying into higher indices.
fn increment_from(counter: &mut Nonce, start: usize) {
    for byte in counter[start..].iter_mut() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// Subtract one at `counter[start]`, borrowing from higher indices.
fn decrement_from(counter: &mut Nonce, start: usize) {
    for byte in counter[start..].iter_mut() {
        let before = *byte;
        *byte = byte.wrapping_sub(1);
        if before != 0 {
            break;
        }
    }
}
