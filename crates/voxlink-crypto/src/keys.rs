//! Session key material.
//!
//! A [`KeyMaterial`] is what the handshake layer hands to both peers: the
//! shared key plus one IV per direction. Each side's encrypt IV is the
//! other side's decrypt IV, so [`KeyMaterial::peer`] swaps them.
//!
//! # Example
//!
//! ```
//! use voxlink_crypto::{CryptState, KeyMaterial};
//!
//! let local = KeyMaterial::generate();
//! let mut alice = CryptState::from_key_material(&local);
//! let mut bob = CryptState::from_key_material(&local.peer());
//!
//! let packet = alice.encrypt(b"hello").unwrap();
//! assert_eq!(bob.decrypt(&packet).unwrap(), b"hello");
//! ```

use crate::cipher::{Block, Key};
use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared key and directional IVs for one session.
///
/// Serializes as base64 strings. The key is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    #[serde(with = "base64_block")]
    pub key: Key,
    #[serde(with = "base64_block")]
    pub encrypt_iv: Block,
    #[serde(with = "base64_block")]
    pub decrypt_iv: Block,
}

impl KeyMaterial {
    /// Generate fresh material using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut material = Self {
            key: [0u8; 16],
            encrypt_iv: [0u8; 16],
            decrypt_iv: [0u8; 16],
        };
        OsRng.fill_bytes(&mut material.key);
        OsRng.fill_bytes(&mut material.encrypt_iv);
        OsRng.fill_bytes(&mut material.decrypt_iv);
        material
    }

    /// The same material as seen from the other end of the session.
    pub fn peer(&self) -> Self {
        Self {
            key: self.key,
            encrypt_iv: self.decrypt_iv,
            decrypt_iv: self.encrypt_iv,
        }
    }

    /// Hex rendering: key, encrypt IV, decrypt IV separated by `:`.
    pub fn to_hex(&self) -> String {
        format!(
            "{}:{}:{}",
            hex::encode(self.key),
            hex::encode(self.encrypt_iv),
            hex::encode(self.decrypt_iv)
        )
    }

    /// Parse the format written by [`KeyMaterial::to_hex`].
    pub fn from_hex(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            anyhow::bail!("expected key:encrypt_iv:decrypt_iv, got {} fields", parts.len());
        }

        Ok(Self {
            key: decode_block(parts[0]).context("invalid key")?,
            encrypt_iv: decode_block(parts[1]).context("invalid encrypt IV")?,
            decrypt_iv: decode_block(parts[2]).context("invalid decrypt IV")?,
        })
    }

    /// Save as JSON.
    ///
    /// The file is created with restricted permissions (0600 on Unix).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Load material written by [`KeyMaterial::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut text =
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let material = serde_json::from_str(&text).context("invalid key material file");
        text.zeroize();
        material
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("encrypt_iv", &hex::encode(self.encrypt_iv))
            .field("decrypt_iv", &hex::encode(self.decrypt_iv))
            .finish()
    }
}

fn decode_block(s: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(s).context("invalid hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 16 bytes, got {}", len))
}

mod base64_block {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(block: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(block))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(s.as_bytes()).map_err(de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| de::Error::custom(format!("expected 16 bytes, got {}", len)))
    }
}
