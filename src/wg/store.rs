//! Interface config file management for provisioned peers

use super::document::{validate_key, ConfigDocument, DocumentError};
use crate::persist::{write_atomic, PersistError};
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),
    #[error("Config file is corrupt: {0}")]
    Corrupt(#[from] DocumentError),
    #[error(transparent)]
    WriteError(#[from] PersistError),
    #[error("Invalid public key {0:?}")]
    InvalidKey(String),
}

/// Owner of the interface config file.
///
/// Callers serialize mutations; every write replaces the file atomically.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document text; empty when the file does not exist yet.
    pub fn read(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{} does not exist yet, treating as empty", self.path.display());
                Ok(String::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, content: &str) -> Result<(), StoreError> {
        write_atomic(&self.path, content.as_bytes())?;
        Ok(())
    }

    pub fn document(&self) -> Result<ConfigDocument, StoreError> {
        Ok(ConfigDocument::parse(&self.read()?)?)
    }

    /// Address recorded in the block for `public_key`, if any.
    pub fn peer_address(&self, public_key: &str) -> Result<Option<Ipv4Addr>, StoreError> {
        let doc = self.document()?;
        Ok(doc
            .find(public_key)
            .and_then(|block| block.addresses().into_iter().next()))
    }

    /// Write a fresh block for `public_key`.
    ///
    /// Any block already carrying this key or granting this address is dropped
    /// first; the live interface may still hold a stale entry for the address
    /// from a peer whose cleanup never finished.
    pub fn upsert_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), StoreError> {
        validate_key(public_key).map_err(|_| StoreError::InvalidKey(public_key.to_string()))?;

        let original = self.read()?;
        let mut doc = ConfigDocument::parse(&original)?;

        if doc.remove_peer(public_key) {
            debug!("Replacing existing block for {}", public_key);
        }
        for stale in doc.remove_address(address) {
            warn!("Dropping stale block for {} holding {}", stale, address);
        }
        doc.append_peer(public_key, address)?;

        let updated = doc.render();
        if updated != original {
            self.write(&updated)?;
        }

        info!("Config block written: {} -> {}", public_key, address);
        Ok(())
    }

    /// Delete the block for `public_key`. Returns whether one existed.
    pub fn remove_peer(&self, public_key: &str) -> Result<bool, StoreError> {
        let original = self.read()?;
        let mut doc = ConfigDocument::parse(&original)?;

        if !doc.remove_peer(public_key) {
            debug!("No config block for {}, nothing to remove", public_key);
            return Ok(false);
        }

        self.write(&doc.render())?;
        info!("Config block removed: {}", public_key);
        Ok(true)
    }
}
