//! Crypt state errors.
//!
//! None of these are fatal: the state stays usable after any of them. Error
//! values never carry key material or plaintext.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptError {
    /// A key or IV buffer had the wrong size.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Key and both IVs have not been set yet.
    #[error("crypt state not ready")]
    NotReady,

    /// Tag mismatch (or an OCB2 forgery shape) on decrypt.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Sequence already consumed, or too far behind to consider.
    #[error("replay rejected: sequence {seq}")]
    ReplayRejected { seq: u8 },

    /// Plaintext has the XEX* forgery shape and the policy is to refuse it.
    #[error("plaintext refused by XEX* policy")]
    RejectedPlaintext,

    /// Packet shorter than the envelope overhead.
    #[error("malformed packet: {0} bytes")]
    MalformedPacket(usize),
}
