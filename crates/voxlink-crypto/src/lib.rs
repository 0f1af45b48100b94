//! Per-session packet encryption for Voxlink voice and data datagrams.
//!
//! This crate provides:
//! - OCB2 authenticated encryption over a pluggable 128-bit block cipher
//! - Directional IV counters with a 1-byte on-wire sequence prefix
//! - Replay rejection and reorder tolerance for lossy UDP delivery
//! - Good/late/lost/resync accounting for monitoring
//!
//! # Design
//!
//! Every datagram is sealed under a 128-bit nonce taken from the sender's
//! encrypt IV, which is incremented before each packet. Only the low byte of
//! that counter travels on the wire; the receiver rebuilds the full nonce from
//! its own copy of the peer's IV. The tag is truncated to 3 bytes, so each
//! packet costs 4 bytes of overhead.
//!
//! ```text
//! [1 byte: seq] [ciphertext, same length as plaintext] [3 bytes: tag]
//! ```
//!
//! One [`CryptState`] represents one session. It is not internally
//! synchronized; use [`CryptState::split`] to drive the two directions from
//! different threads.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod iv;
pub mod keys;
pub mod ocb;
pub mod state;
pub mod stats;

pub use cipher::{Aes128Cipher, Block, BlockCipher, Key, BLOCK_SIZE, KEY_SIZE};
pub use codec::{Envelope, OVERHEAD, TAG_LEN};
pub use config::{ConfigError, CryptConfig, XexStarPolicy};
pub use error::CryptError;
pub use iv::Iv;
pub use keys::KeyMaterial;
pub use ocb::{Ocb, OcbError};
pub use state::{CryptState, Decryptor, Encryptor};
pub use stats::CryptStats;
