//! OCB authenticated encryption over a raw block cipher.
//!
//! Offsets live in GF(2^128) with the reduction constant `0x87`. Every block
//! except the last is masked with the running offset on both sides of the
//! cipher; the last block (0..=16 bytes) is encrypted by XOR with a pad
//! derived from its bit length. The tag is the encryption of the tripled
//! offset XOR the plaintext checksum.
//!
//! The engine always produces the full 16-byte tag; truncation is the
//! caller's business.

use crate::block::{AesBlockCipher, BlockCipher, BLOCK_SIZE};
use murmur_core::KEY_SIZE;

pub const TAG_SIZE: usize = BLOCK_SIZE;

type Block = [u8; BLOCK_SIZE];

#[derive(Debug)]
pub struct OcbEngine<C = AesBlockCipher> {
    cipher: C,
}

impl OcbEngine<AesBlockCipher> {
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self::with_cipher(AesBlockCipher::new(key))
    }
}

impl<C: BlockCipher> OcbEngine<C> {
    pub fn with_cipher(cipher: C) -> Self {
        Self { cipher }
    }

    /// Encrypt `plaintext` under `nonce`, returning the ciphertext (same
    /// length as the input) and the full tag.
    pub fn seal(&self, plaintext: &[u8], nonce: &Block) -> (Vec<u8>, [u8; TAG_SIZE]) {
        let mut ciphertext = Vec::with_capacity(plaintext.len());
        let mut checksum = [0u8; BLOCK_SIZE];
        let mut offset = *nonce;
        self.cipher.encrypt_block(&mut offset);

        let mut rest = plaintext;
        while rest.len() > BLOCK_SIZE {
            let (chunk, tail) = rest.split_at(BLOCK_SIZE);
            double(&mut offset);

            let mut tmp = load(chunk);
            xor_into(&mut checksum, &tmp);
            xor_into(&mut tmp, &offset);
            self.cipher.encrypt_block(&mut tmp);
            xor_into(&mut tmp, &offset);
            ciphertext.extend_from_slice(&tmp);

            rest = tail;
        }

        let pad = self.final_pad(&mut offset, rest.len());

        // Checksum covers plaintext || pad[len..].
        let mut tmp = pad;
        tmp[..rest.len()].copy_from_slice(rest);
        xor_into(&mut checksum, &tmp);
        ciphertext.extend(rest.iter().zip(pad.iter()).map(|(p, k)| p ^ k));

        (ciphertext, self.tag(&mut offset, &checksum))
    }

    /// Decrypt `ciphertext` under `nonce`, returning the plaintext and the
    /// recomputed tag for the caller to compare.
    pub fn open(&self, ciphertext: &[u8], nonce: &Block) -> (Vec<u8>, [u8; TAG_SIZE]) {
        let mut plaintext = Vec::with_capacity(ciphertext.len());
        let mut checksum = [0u8; BLOCK_SIZE];
        let mut offset = *nonce;
        self.cipher.encrypt_block(&mut offset);

        let mut rest = ciphertext;
        while rest.len() > BLOCK_SIZE {
            let (chunk, tail) = rest.split_at(BLOCK_SIZE);
            double(&mut offset);

            let mut tmp = load(chunk);
            xor_into(&mut tmp, &offset);
            self.cipher.decrypt_block(&mut tmp);
            xor_into(&mut tmp, &offset);
            xor_into(&mut checksum, &tmp);
            plaintext.extend_from_slice(&tmp);

            rest = tail;
        }

        let pad = self.final_pad(&mut offset, rest.len());

        let mut tmp = [0u8; BLOCK_SIZE];
        tmp[..rest.len()].copy_from_slice(rest);
        xor_into(&mut tmp, &pad);
        xor_into(&mut checksum, &tmp);
        plaintext.extend_from_slice(&tmp[..rest.len()]);

        (plaintext, self.tag(&mut offset, &checksum))
    }

    fn final_pad(&self, offset: &mut Block, len: usize) -> Block {
        double(offset);

        let mut pad = [0u8; BLOCK_SIZE];
        pad[BLOCK_SIZE - 2..].copy_from_slice(&((len * 8) as u16).to_be_bytes());
        xor_into(&mut pad, offset);
        self.cipher.encrypt_block(&mut pad);
        pad
    }

    fn tag(&self, offset: &mut Block, checksum: &Block) -> [u8; TAG_SIZE] {
        triple(offset);
        let mut tag = *offset;
        xor_into(&mut tag, checksum);
        self.cipher.encrypt_block(&mut tag);
        tag
    }
}

/// Multiply by x in GF(2^128).
fn double(block: &mut Block) {
    let carry = block[0] >> 7;
    for i in 0..BLOCK_SIZE - 1 {
        block[i] = (block[i] << 1) | (block[i + 1] >> 7);
    }
    block[BLOCK_SIZE - 1] = (block[BLOCK_SIZE - 1] << 1) ^ (carry * 0x87);
}

/// Multiply by x + 1 in GF(2^128).
fn triple(block: &mut Block) {
    let mut doubled = *block;
    double(&mut doubled);
    xor_into(block, &doubled);
}

fn xor_into(dst: &mut Block, src: &Block) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

fn load(chunk: &[u8]) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(chunk);
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_key() -> [u8; 16] {
        let mut key = [0u8; 16];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn test_double_shifts_across_bytes() {
        let mut block = [0u8; 16];
        block[1] = 0x80;
        double(&mut block);
        assert_eq!(block[0], 0x01);
        assert_eq!(block[1], 0x00);
    }

    #[test]
    fn test_double_reduces_on_carry() {
        let mut block = [0u8; 16];
        block[0] = 0x80;
        double(&mut block);
        let mut expected = [0u8; 16];
        expected[15] = 0x87;
        assert_eq!(block, expected);
    }

    #[test]
    fn test_triple_is_double_xor_self() {
        let mut block = [0u8; 16];
        block[0] = 0x81;
        block[15] = 0x01;
        let mut tripled = block;
        triple(&mut tripled);

        let mut doubled = block;
        double(&mut doubled);
        xor_into(&mut doubled, &block);
        assert_eq!(tripled, doubled);
    }

    #[test]
    fn test_empty_message_vector() {
        // OCB-AES-128-0B
        let key = counting_key();
        let engine = OcbEngine::new(&key);
        let (ciphertext, tag) = engine.seal(&[], &key);

        assert!(ciphertext.is_empty());
        assert_eq!(
            tag,
            [
                0xBF, 0x31, 0x08, 0x13, 0x07, 0x73, 0xAD, 0x5E, 0xC7, 0x0E, 0xC6, 0x9E, 0x78,
                0x75, 0xA7, 0xB0
            ]
        );
    }

    #[test]
    fn test_forty_byte_vector() {
        // OCB-AES-128-40B
        let key = counting_key();
        let plaintext: Vec<u8> = (0..40u8).collect();
        let engine = OcbEngine::new(&key);
        let (ciphertext, tag) = engine.seal(&plaintext, &key);

        let expected_ciphertext: [u8; 40] = [
            0xF7, 0x5D, 0x6B, 0xC8, 0xB4, 0xDC, 0x8D, 0x66, 0xB8, 0x36, 0xA2, 0xB0, 0x8B, 0x32,
            0xA6, 0x36, 0x9F, 0x1C, 0xD3, 0xC5, 0x22, 0x8D, 0x79, 0xFD, 0x6C, 0x26, 0x7F, 0x5F,
            0x6A, 0xA7, 0xB2, 0x31, 0xC7, 0xDF, 0xB9, 0xD5, 0x99, 0x51, 0xAE, 0x9C,
        ];
        let expected_tag: [u8; 16] = [
            0x9D, 0xB0, 0xCD, 0xF8, 0x80, 0xF7, 0x3E, 0x3E, 0x10, 0xD4, 0xEB, 0x32, 0x17, 0x76,
            0x66, 0x88,
        ];
        assert_eq!(ciphertext, expected_ciphertext);
        assert_eq!(tag, expected_tag);

        let (recovered, recomputed) = engine.open(&ciphertext, &key);
        assert_eq!(recovered, plaintext);
        assert_eq!(recomputed, expected_tag);
    }

    #[test]
    fn test_round_trip_all_lengths() {
        let engine = OcbEngine::new(&counting_key());
        let nonce = [0x42u8; 16];
        let plaintext: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        for len in 0..=1000 {
            let input = &plaintext[..len];
            let (ciphertext, tag) = engine.seal(input, &nonce);
            assert_eq!(ciphertext.len(), len);

            let (recovered, recomputed) = engine.open(&ciphertext, &nonce);
            assert_eq!(recovered, input, "length {len}");
            assert_eq!(recomputed, tag, "length {len}");
        }
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let engine = OcbEngine::new(&counting_key());
        let plaintext = [0u8; 48];
        let (ciphertext, _) = engine.seal(&plaintext, &[0u8; 16]);
        assert_ne!(&ciphertext[..], &plaintext[..]);
    }

    #[test]
    fn test_tamper_changes_tag() {
        let engine = OcbEngine::new(&counting_key());
        let nonce = [7u8; 16];
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let (ciphertext, tag) = engine.seal(plaintext, &nonce);

        for (index, mask) in [(0usize, 0x01u8), (15, 0x80), (16, 0x10), (42, 0x01)] {
            let mut corrupted = ciphertext.clone();
            corrupted[index] ^= mask;
            let (_, recomputed) = engine.open(&corrupted, &nonce);
            assert_ne!(recomputed, tag, "byte {index} mask {mask:#x}");
        }

        let mut other_nonce = nonce;
        other_nonce[0] ^= 0x01;
        let (_, recomputed) = engine.open(&ciphertext, &other_nonce);
        assert_ne!(recomputed, tag);
    }

    #[test]
    fn test_scenario_ping_payload() {
        let engine = OcbEngine::new(&counting_key());
        let nonce = [0u8; 16];
        let (ciphertext, tag) = engine.seal(b"ping-1234", &nonce);
        assert_eq!(ciphertext.len(), 9);

        let (recovered, recomputed) = engine.open(&ciphertext, &nonce);
        assert_eq!(&recovered[..], b"ping-1234");
        assert_eq!(recomputed, tag);
    }
}
