//! Peer key pair generation

use super::control::{run, ControlError};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// A freshly minted peer key pair
#[derive(Clone)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}

pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyPair, ControlError>;
    /// Derive the public half of `private_key`
    fn public_key(&self, private_key: &str) -> Result<String, ControlError>;
}

/// Generates keys with `wg genkey` / `wg pubkey`
pub struct WgKeyGenerator {
    wg_path: PathBuf,
}

impl WgKeyGenerator {
    pub fn new() -> Self {
        Self {
            wg_path: PathBuf::from("wg"),
        }
    }

    pub fn with_wg_path(wg_path: impl Into<PathBuf>) -> Self {
        Self {
            wg_path: wg_path.into(),
        }
    }
}

impl Default for WgKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for WgKeyGenerator {
    fn generate(&self) -> Result<KeyPair, ControlError> {
        let out = run(
            &mut Command::new(&self.wg_path).arg("genkey"),
            "wg",
            &["genkey"],
            None,
        )?;
        let private_key = single_line(out, "wg genkey")?;
        let public_key = self.public_key(&private_key)?;
        debug!("Generated key pair for {}", public_key);
        Ok(KeyPair {
            private_key,
            public_key,
        })
    }

    fn public_key(&self, private_key: &str) -> Result<String, ControlError> {
        let out = run(
            &mut Command::new(&self.wg_path).arg("pubkey"),
            "wg",
            &["pubkey"],
            Some(private_key),
        )?;
        single_line(out, "wg pubkey")
    }
}

fn single_line(out: String, command: &str) -> Result<String, ControlError> {
    let key = out.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(ControlError::BadOutput {
            command: command.to_string(),
            reason: format!("expected a single key, got {:?}", key),
        });
    }
    Ok(key.to_string())
}
