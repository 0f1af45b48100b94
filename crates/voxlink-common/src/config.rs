//! Configuration file loading.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;
use tracing::debug;
use voxlink_crypto::CryptConfig;

/// Read a JSON configuration file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)
        .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
    debug!(path = %path.display(), "loaded configuration");
    Ok(config)
}

/// Read and validate a crypt configuration, falling back to defaults when no
/// path is given.
pub fn load_crypt_config(path: Option<&Path>) -> Result<CryptConfig> {
    let config = match path {
        Some(path) => load_config::<CryptConfig>(path)?,
        None => CryptConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
