//! Tolerance and buffer-handling settings for a crypt state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How far behind the newest packet (in sequence steps) a late packet may be.
pub const DEFAULT_LATE_WINDOW: u8 = 30;

/// How many 256-packet epochs ahead to search when resynchronizing.
pub const DEFAULT_RESYNC_EPOCHS: u8 = 4;

/// Upper bound on `resync_epochs`. Keeps the worst case at 17 trial
/// decryptions per packet and forgery odds near 2^-20.
pub const MAX_RESYNC_EPOCHS: u8 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("late_window must be between 1 and 127, got {0}")]
    LateWindow(u8),

    #[error("resync_epochs must be at most 16, got {0}")]
    ResyncEpochs(u8),
}

/// What to do with a plaintext that has the XEX* forgery shape (see
/// [`crate::ocb::is_xex_star_shaped`]), such as an all-zero frame longer than
/// one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XexStarPolicy {
    /// Flip the low bit of the offending block. The packet is sent, and the
    /// receiver sees the flipped bit.
    #[default]
    Perturb,
    /// Refuse to encrypt it with `CryptError::RejectedPlaintext`.
    Reject,
}

/// Crypt state configuration.
///
/// Missing fields fall back to their defaults when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptConfig {
    /// Packets up to this many steps behind the newest accepted one are
    /// still decrypted (once each). Older ones are rejected unseen.
    pub late_window: u8,

    /// Epochs to search ahead after a packet fails to fit the current
    /// position. Each step costs one extra trial decryption of the packet
    /// and lowers forgery resistance by the same factor; 0 disables resync.
    /// At most [`MAX_RESYNC_EPOCHS`]. Packets that keep landing on already
    /// used history slots after a long burst of loss are also recovered
    /// through this search.
    pub resync_epochs: u8,

    /// Handling of XEX*-shaped plaintexts on encrypt.
    pub xex_star: XexStarPolicy,

    /// Let `encrypt_in_place` seal inside the caller's buffer. Avoids an
    /// allocation and a copy per packet; the caller's plaintext is consumed
    /// as cipher scratch space. When off, the in-place call falls back to a
    /// copy and only swaps the finished envelope into the buffer.
    pub allow_in_place_scratch: bool,
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            late_window: DEFAULT_LATE_WINDOW,
            resync_epochs: DEFAULT_RESYNC_EPOCHS,
            xex_star: XexStarPolicy::Perturb,
            allow_in_place_scratch: false,
        }
    }
}

impl CryptConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Beyond 127 a late packet is indistinguishable from one far ahead.
        if self.late_window == 0 || self.late_window > 127 {
            return Err(ConfigError::LateWindow(self.late_window));
        }
        if self.resync_epochs > MAX_RESYNC_EPOCHS {
            return Err(ConfigError::ResyncEpochs(self.resync_epochs));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CryptConfig::default().validate().is_ok());
    }

    #[test]
    fn test_late_window_bounds() {
        let mut config = CryptConfig::default();

        config.late_window = 0;
        assert_eq!(config.validate(), Err(ConfigError::LateWindow(0)));

        config.late_window = 128;
        assert_eq!(config.validate(), Err(ConfigError::LateWindow(128)));

        config.late_window = 127;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resync_epochs_bound() {
        let mut config = CryptConfig::default();

        config.resync_epochs = MAX_RESYNC_EPOCHS;
        assert!(config.validate().is_ok());

        config.resync_epochs = 255;
        assert_eq!(config.validate(), Err(ConfigError::ResyncEpochs(255)));

        config.resync_epochs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_xex_star_policy_from_json() {
        let config: CryptConfig = serde_json::from_str(r#"{"xex_star": "reject"}"#).unwrap();
        assert_eq!(config.xex_star, XexStarPolicy::Reject);
        assert_eq!(CryptConfig::default().xex_star, XexStarPolicy::Perturb);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CryptConfig = serde_json::from_str(r#"{"late_window": 8}"#).unwrap();
        assert_eq!(config.late_window, 8);
        assert_eq!(config.resync_epochs, DEFAULT_RESYNC_EPOCHS);
        assert!(!config.allow_in_place_scratch);
    }
}
