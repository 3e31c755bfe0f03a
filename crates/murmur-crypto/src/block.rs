//! Single-block cipher seam.

use std::fmt;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

use murmur_core::KEY_SIZE;

pub const BLOCK_SIZE: usize = 16;

/// A 128-bit block cipher keyed once per session.
pub trait BlockCipher: Send + Sync {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

/// AES-128 in raw single-block mode. The key schedule is zeroized on drop.
pub struct AesBlockCipher {
    inner: Aes128,
}

impl AesBlockCipher {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            inner: Aes128::new(key.into()),
        }
    }
}

impl BlockCipher for AesBlockCipher {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.inner.encrypt_block(Block::from_mut_slice(block));
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.inner.decrypt_block(Block::from_mut_slice(block));
    }
}

impl fmt::Debug for AesBlockCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesBlockCipher { .. }")
    }
}
