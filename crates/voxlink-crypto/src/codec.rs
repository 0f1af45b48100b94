//! Packet envelope framing.
//!
//! ```text
//! [1 byte: seq] [ciphertext] [3 bytes: tag prefix]
//! ```
//!
//! The codec only slices buffers. It knows nothing about keys or nonces.

use crate::cipher::Block;
use crate::error::CryptError;
use bytes::{BufMut, Bytes, BytesMut};

/// Sequence prefix length.
pub const SEQ_LEN: usize = 1;

/// Bytes of the 128-bit tag carried on the wire.
pub const TAG_LEN: usize = 3;

/// Fixed per-packet overhead.
pub const OVERHEAD: usize = SEQ_LEN + TAG_LEN;

/// A parsed inbound envelope borrowing from the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub seq: u8,
    pub ciphertext: &'a [u8],
    pub tag: &'a [u8],
}

impl<'a> Envelope<'a> {
    /// Split a packet into its fields.
    ///
    /// Anything shorter than [`OVERHEAD`] is malformed.
    pub fn parse(packet: &'a [u8]) -> Result<Self, CryptError> {
        if packet.len() < OVERHEAD {
            return Err(CryptError::MalformedPacket(packet.len()));
        }

        let (seq, rest) = (packet[0], &packet[SEQ_LEN..]);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        Ok(Self {
            seq,
            ciphertext,
            tag,
        })
    }
}

/// Outbound envelope being sealed in its own buffer.
///
/// The body starts out as a copy of the plaintext and is encrypted in place,
/// so sealing costs one allocation and never touches the caller's buffer.
pub struct EnvelopeBuilder {
    buf: BytesMut,
}

impl EnvelopeBuilder {
    pub fn new(seq: u8, plaintext: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(OVERHEAD + plaintext.len());
        buf.put_u8(seq);
        buf.put_slice(plaintext);
        Self { buf }
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.buf[SEQ_LEN..]
    }

    /// Append the truncated tag and hand back the wire bytes.
    pub fn finish(mut self, tag: &Block) -> Bytes {
        self.buf.put_slice(&tag[..TAG_LEN]);
        self.buf.freeze()
    }
}

/// Frame an already-encrypted body that lives in `buf`.
pub fn frame_in_place(buf: &mut Vec<u8>, seq: u8, tag: &Block) {
    buf.reserve(OVERHEAD);
    buf.insert(0, seq);
    buf.extend_from_slice(&tag[..TAG_LEN]);
}
