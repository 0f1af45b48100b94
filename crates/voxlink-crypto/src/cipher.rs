//! Block cipher seam.
//!
//! OCB2 only needs a keyed 128-bit permutation and its inverse. The engine is
//! generic over [`BlockCipher`] so the AES implementation can be swapped for
//! another provider without touching the mode or the session logic.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use std::fmt;

/// Cipher block width in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Shared secret width in bytes.
pub const KEY_SIZE: usize = 16;

/// One cipher block.
pub type Block = [u8; BLOCK_SIZE];

/// Raw shared secret.
pub type Key = [u8; KEY_SIZE];

/// Keyed 128-bit block permutation.
pub trait BlockCipher: Send + Sync {
    /// Expand a raw key into a ready-to-use cipher.
    fn new(key: &Key) -> Self
    where
        Self: Sized;

    /// Apply the forward permutation in place.
    fn encrypt_block(&self, block: &mut Block);

    /// Apply the inverse permutation in place.
    fn decrypt_block(&self, block: &mut Block);
}

/// AES-128 from the RustCrypto `aes` crate.
#[derive(Clone)]
pub struct Aes128Cipher(Aes128);

impl BlockCipher for Aes128Cipher {
    fn new(key: &Key) -> Self {
        Self(Aes128::new(key.into()))
    }

    fn encrypt_block(&self, block: &mut Block) {
        self.0.encrypt_block(block.into());
    }

    fn decrypt_block(&self, block: &mut Block) {
        self.0.decrypt_block(block.into());
    }
}

impl fmt::Debug for Aes128Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Aes128Cipher(..)")
    }
}
