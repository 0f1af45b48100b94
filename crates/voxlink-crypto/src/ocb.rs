//! OCB2 authenticated encryption.
//!
//! Single pass over the block cipher: every block is whitened with a running
//! offset (`delta`), a checksum of the plaintext is folded into the tag, and
//! the final block (0 to 16 bytes) is encrypted with a pad derived from its
//! bit length so partial blocks need no padding.
//!
//! ```text
//! delta  = E(N)
//! C[i]   = delta_i ^ E(P[i] ^ delta_i)           delta_i = 2 * delta_{i-1}
//! pad    = E(len(P[m]) ^ delta_m)
//! C[m]   = P[m] ^ pad[..r]
//! tag    = E(checksum ^ 3 * delta_m)             checksum = P[1] ^ .. ^ (P[m] || pad[r..])
//! ```
//!
//! # XEX* counter-measure
//!
//! OCB2 is forgeable (Inoue, Minematsu et al., eprint 2019/311) when a sender
//! encrypts a message whose second-to-last block equals the length encoding
//! of a full final block. Encryption therefore perturbs one bit of such a
//! block (or refuses it, via [`Ocb::encrypt_strict`]), and decryption rejects
//! any message whose decrypted final block matches the current offset.

use crate::cipher::{Block, BlockCipher, BLOCK_SIZE};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;
use zeroize::Zeroize;

/// OCB2 errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OcbError {
    #[error("authentication failed")]
    Authentication,

    #[error("message has the shape of an XEX* forgery")]
    XexStar,
}

/// OCB2 mode over a keyed block cipher.
#[derive(Debug, Clone)]
pub struct Ocb<C> {
    cipher: C,
}

impl<C: BlockCipher> Ocb<C> {
    pub fn new(cipher: C) -> Self {
        Self { cipher }
    }

    /// Encrypt `plaintext` under `nonce`.
    ///
    /// Works on a private copy: the caller's buffer is never written, even
    /// when the XEX* perturbation applies. Returns the ciphertext and the
    /// full 128-bit tag.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &Block) -> (Vec<u8>, Block) {
        let mut buf = plaintext.to_vec();
        let tag = self.seal(&mut buf, nonce);
        (buf, tag)
    }

    /// Encrypt `buf` in place and return the full tag.
    ///
    /// Saves the copy made by [`Ocb::encrypt`]. The buffer doubles as the
    /// scratch space, so a perturbed block is perturbed in the caller's memory
    /// before it is overwritten with ciphertext.
    pub fn encrypt_in_place(&self, buf: &mut [u8], nonce: &Block) -> Block {
        self.seal(buf, nonce)
    }

    /// Like [`Ocb::encrypt`], but refuse messages that would need the XEX*
    /// perturbation instead of altering them.
    pub fn encrypt_strict(&self, plaintext: &[u8], nonce: &Block) -> Result<(Vec<u8>, Block), OcbError> {
        if is_xex_star_shaped(plaintext) {
            return Err(OcbError::XexStar);
        }
        Ok(self.encrypt(plaintext, nonce))
    }

    /// Decrypt `ciphertext` under `nonce` and check it against `tag`.
    ///
    /// `tag` may be the full 16-byte tag or a prefix of it, as carried on the
    /// wire. Nothing is returned unless the tag matches.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &Block, tag: &[u8]) -> Result<Vec<u8>, OcbError> {
        let mut buf = ciphertext.to_vec();
        self.decrypt_in_place(&mut buf, nonce, tag)?;
        Ok(buf)
    }

    /// Decrypt `buf` in place. On failure the buffer is zeroed.
    pub fn decrypt_in_place(&self, buf: &mut [u8], nonce: &Block, tag: &[u8]) -> Result<(), OcbError> {
        if tag.is_empty() || tag.len() > BLOCK_SIZE {
            buf.zeroize();
            return Err(OcbError::Authentication);
        }

        let (computed, forged) = self.open(buf, nonce);
        let matches: Choice = computed[..tag.len()].ct_eq(tag);

        if forged {
            buf.zeroize();
            return Err(OcbError::XexStar);
        }
        if !bool::from(matches) {
            buf.zeroize();
            return Err(OcbError::Authentication);
        }
        Ok(())
    }

    fn encipher(&self, mut block: Block) -> Block {
        self.cipher.encrypt_block(&mut block);
        block
    }

    fn decipher(&self, mut block: Block) -> Block {
        self.cipher.decrypt_block(&mut block);
        block
    }

    fn seal(&self, buf: &mut [u8], nonce: &Block) -> Block {
        let mut delta = self.encipher(*nonce);
        let mut checksum = [0u8; BLOCK_SIZE];

        let (head, tail) = buf.split_at_mut(leading_len(buf.len()));
        let critical = xex_star_block(head);
        let blocks = head.len() / BLOCK_SIZE;

        for (i, chunk) in head.chunks_exact_mut(BLOCK_SIZE).enumerate() {
            if critical && i + 1 == blocks {
                chunk[0] ^= 1;
            }
            let plain = to_block(chunk);

            delta = times2(&delta);
            let mut tmp = plain;
            xor_into(&mut tmp, &delta);
            let mut out = self.encipher(tmp);
            xor_into(&mut out, &delta);
            xor_into(&mut checksum, &plain);

            chunk.copy_from_slice(&out);
        }

        delta = times2(&delta);
        let mut pad = length_block(tail.len());
        xor_into(&mut pad, &delta);
        let pad = self.encipher(pad);

        let mut last = pad;
        last[..tail.len()].copy_from_slice(tail);
        xor_into(&mut checksum, &last);
        for (byte, p) in tail.iter_mut().zip(pad.iter()) {
            *byte ^= p;
        }

        delta = times3(&delta);
        xor_into(&mut checksum, &delta);
        self.encipher(checksum)
    }

    /// Decrypt in place and return the computed tag plus whether the final
    /// block has the XEX* forgery signature. Does not authenticate.
    fn open(&self, buf: &mut [u8], nonce: &Block) -> (Block, bool) {
        let mut delta = self.encipher(*nonce);
        let mut checksum = [0u8; BLOCK_SIZE];

        let (head, tail) = buf.split_at_mut(leading_len(buf.len()));

        for chunk in head.chunks_exact_mut(BLOCK_SIZE) {
            delta = times2(&delta);
            let mut tmp = to_block(chunk);
            xor_into(&mut tmp, &delta);
            let mut plain = self.decipher(tmp);
            xor_into(&mut plain, &delta);
            xor_into(&mut checksum, &plain);

            chunk.copy_from_slice(&plain);
        }

        delta = times2(&delta);
        let mut pad = length_block(tail.len());
        xor_into(&mut pad, &delta);
        let pad = self.encipher(pad);

        let mut last = [0u8; BLOCK_SIZE];
        last[..tail.len()].copy_from_slice(tail);
        xor_into(&mut last, &pad);
        xor_into(&mut checksum, &last);
        tail.copy_from_slice(&last[..tail.len()]);

        // The length encoding only touches the last byte, so compare the rest.
        let forged = last[..BLOCK_SIZE - 1] == delta[..BLOCK_SIZE - 1];

        delta = times3(&delta);
        xor_into(&mut checksum, &delta);
        (self.encipher(checksum), forged)
    }
}

/// Bytes handled by the full-block loop; the final block gets the rest.
fn leading_len(len: usize) -> usize {
    len.saturating_sub(1) / BLOCK_SIZE * BLOCK_SIZE
}

/// True if the last block of `head` is zero except for its final byte.
fn xex_star_block(head: &[u8]) -> bool {
    match head.len().checked_sub(BLOCK_SIZE) {
        Some(start) => head[start..start + BLOCK_SIZE - 1].iter().all(|&b| b == 0),
        None => false,
    }
}

/// True if encrypting `plaintext` would trigger the XEX* perturbation, i.e.
/// the last full block ahead of the final block is zero in its first 15
/// bytes. All-zero frames longer than one block (digital silence) qualify.
pub fn is_xex_star_shaped(plaintext: &[u8]) -> bool {
    xex_star_block(&plaintext[..leading_len(plaintext.len())])
}

fn to_block(chunk: &[u8]) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(chunk);
    block
}

fn xor_into(dst: &mut Block, src: &Block) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Doubling in GF(2^128), big-endian, x^128 + x^7 + x^2 + x + 1.
fn times2(block: &Block) -> Block {
    let v = u128::from_be_bytes(*block);
    let carry = v >> 127;
    ((v << 1) ^ (carry * 0x87)).to_be_bytes()
}

fn times3(block: &Block) -> Block {
    let mut out = times2(block);
    xor_into(&mut out, block);
    out
}

/// Final-block length encoding: bit count, big-endian, in the last 8 bytes.
fn length_block(len: usize) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    block[8..].copy_from_slice(&(len as u64 * 8).to_be_bytes());
    block
}
