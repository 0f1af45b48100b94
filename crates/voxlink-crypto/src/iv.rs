//! Directional IV counters.
//!
//! An IV is a 128-bit little-endian counter. Byte 0 is the sequence byte that
//! goes on the wire; byte 1 is the epoch that advances each time byte 0
//! wraps. Carries run through all 16 bytes.

use crate::cipher::{Block, BLOCK_SIZE};
use crate::error::CryptError;
use std::fmt;
use zeroize::Zeroize;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Zeroize)]
pub struct Iv(Block);

impl Iv {
    pub fn from_bytes(bytes: Block) -> Self {
        Self(bytes)
    }

    /// Parse an IV, rejecting anything that is not exactly one block.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptError> {
        let block: Block = bytes.try_into().map_err(|_| CryptError::InvalidLength {
            expected: BLOCK_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(block))
    }

    pub fn from_counter(counter: u128) -> Self {
        Self(counter.to_le_bytes())
    }

    pub fn as_bytes(&self) -> &Block {
        &self.0
    }

    pub fn counter(&self) -> u128 {
        u128::from_le_bytes(self.0)
    }

    /// Low byte, sent as the packet's sequence prefix.
    pub fn seq(&self) -> u8 {
        self.0[0]
    }

    pub fn epoch(&self) -> u8 {
        self.0[1]
    }

    /// Step to the next nonce.
    pub fn advance(&mut self) {
        *self = Self::from_counter(self.counter().wrapping_add(1));
    }

    /// The IV `distance` steps away, wrapping at 2^128.
    pub fn offset(&self, distance: i128) -> Self {
        Self::from_counter(self.counter().wrapping_add_signed(distance))
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_carries_into_epoch() {
        let mut iv = Iv::from_bytes([0xff, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        iv.advance();
        assert_eq!(iv.seq(), 0);
        assert_eq!(iv.epoch(), 1);
    }

    #[test]
    fn test_advance_carries_through_all_bytes() {
        let mut bytes = [0xff; BLOCK_SIZE];
        bytes[BLOCK_SIZE - 1] = 0x00;
        let mut iv = Iv::from_bytes(bytes);
        iv.advance();

        let mut expected = [0u8; BLOCK_SIZE];
        expected[BLOCK_SIZE - 1] = 0x01;
        assert_eq!(iv.as_bytes(), &expected);
    }

    #[test]
    fn test_advance_wraps_at_top() {
        let mut iv = Iv::from_bytes([0xff; BLOCK_SIZE]);
        iv.advance();
        assert_eq!(iv, Iv::default());
    }

    #[test]
    fn test_offset_backwards_borrows_from_epoch() {
        let iv = Iv::from_bytes([0x02, 0x05, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let earlier = iv.offset(-3);
        assert_eq!(earlier.seq(), 0xff);
        assert_eq!(earlier.epoch(), 0x04);
    }

    #[test]
    fn test_from_slice_length() {
        assert!(Iv::from_slice(&[0u8; BLOCK_SIZE]).is_ok());
        assert_eq!(
            Iv::from_slice(&[0u8; 15]),
            Err(CryptError::InvalidLength {
                expected: 16,
                actual: 15
            })
        );
    }
}
