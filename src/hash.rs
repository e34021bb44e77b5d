//! Resumable SHA-256.
//!
//! Standard hash APIs finalize in place and never expose their internal
//! state, which makes them useless for suspend/resume. This wrapper keeps
//! the eight running digest registers and the buffered partial block itself
//! and drives `sha2`'s compression function directly, so the full midstream
//! state can be exported, serialized, and imported bit-for-bit.

use crate::error::DigestError;
use serde::{Deserialize, Serialize};
use sha2::compress256;
use sha2::digest::generic_array::GenericArray;

const BLOCK_LEN: usize = 64;

/// SHA-256 initialization vector (FIPS 180-4)
const H0: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// Incremental SHA-256 with exportable internal state.
///
/// Importing an exported state and writing the same subsequent bytes yields
/// the identical final sum as an uninterrupted computation.
#[derive(Clone)]
pub struct ResumableSha256 {
    state: [u32; 8],
    /// Total message bytes absorbed so far
    len: u64,
    buf: [u8; BLOCK_LEN],
    buf_len: usize,
}

/// Serializable snapshot of a [`ResumableSha256`] midstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashState {
    state: [u32; 8],
    len: u64,
    buf: Vec<u8>,
}

impl ResumableSha256 {
    pub fn new() -> Self {
        Self {
            state: H0,
            len: 0,
            buf: [0; BLOCK_LEN],
            buf_len: 0,
        }
    }

    /// Restore the initial (empty-message) state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Absorb message bytes.
    pub fn update(&mut self, mut input: &[u8]) {
        self.len = self.len.wrapping_add(input.len() as u64);

        // Top up a buffered partial block first.
        if self.buf_len > 0 {
            let take = (BLOCK_LEN - self.buf_len).min(input.len());
            self.buf[self.buf_len..self.buf_len + take].copy_from_slice(&input[..take]);
            self.buf_len += take;
            input = &input[take..];
            if self.buf_len == BLOCK_LEN {
                let block = GenericArray::clone_from_slice(&self.buf);
                compress256(&mut self.state, std::slice::from_ref(&block));
                self.buf_len = 0;
            }
        }

        let mut chunks = input.chunks_exact(BLOCK_LEN);
        for chunk in &mut chunks {
            compress256(
                &mut self.state,
                std::slice::from_ref(GenericArray::from_slice(chunk)),
            );
        }

        let rem = chunks.remainder();
        if !rem.is_empty() {
            self.buf[..rem.len()].copy_from_slice(rem);
            self.buf_len = rem.len();
        }
    }

    /// Finalize a copy of the running state, optionally absorbing `extra`
    /// first. The receiver itself is left untouched and may keep absorbing.
    pub fn sum(&self, extra: &[u8]) -> [u8; 32] {
        let mut copy = self.clone();
        copy.update(extra);
        copy.finalize()
    }

    fn finalize(mut self) -> [u8; 32] {
        let bit_len = self.len.wrapping_mul(8);

        // Merkle-Damgard padding: 0x80, zeros, 64-bit big-endian bit length.
        let pad_len = if self.buf_len < 56 {
            56 - self.buf_len
        } else {
            BLOCK_LEN + 56 - self.buf_len
        };
        let mut pad = [0u8; BLOCK_LEN + 56];
        pad[0] = 0x80;
        self.update(&pad[..pad_len]);
        self.update(&bit_len.to_be_bytes());
        debug_assert_eq!(self.buf_len, 0);

        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.state.iter()) {
            chunk.copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Export the full internal state: digest registers, message length,
    /// and the buffered partial block.
    pub fn export_state(&self) -> HashState {
        HashState {
            state: self.state,
            len: self.len,
            buf: self.buf[..self.buf_len].to_vec(),
        }
    }

    /// Replace the internal state with a previously exported one.
    pub fn import_state(&mut self, snapshot: &HashState) -> Result<(), DigestError> {
        if snapshot.buf.len() >= BLOCK_LEN {
            return Err(DigestError::CorruptState(format!(
                "hash state buffers {} bytes, more than a full block",
                snapshot.buf.len()
            )));
        }
        if snapshot.len % BLOCK_LEN as u64 != snapshot.buf.len() as u64 {
            return Err(DigestError::CorruptState(format!(
                "hash state length {} inconsistent with {} buffered bytes",
                snapshot.len,
                snapshot.buf.len()
            )));
        }

        self.state = snapshot.state;
        self.len = snapshot.len;
        self.buf = [0; BLOCK_LEN];
        self.buf[..snapshot.buf.len()].copy_from_slice(&snapshot.buf);
        self.buf_len = snapshot.buf.len();
        Ok(())
    }
}

impl Default for ResumableSha256 {
    fn default() -> Self {
        Self::new()
    }
}
