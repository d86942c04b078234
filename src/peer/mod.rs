//! Peer lifecycle and query surface
//!
//! - `directory`: read-only listing of live peers
//! - `service`: create/delete with compensation on failure
//! - `client`: client-side config rendering

pub mod client;
pub mod directory;
pub mod service;

use crate::pool::AllocatorError;
use crate::wg::{ControlError, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::Ipv4Addr;
use thiserror::Error;

pub use client::ClientTemplate;
pub use directory::PeerDirectory;
pub use service::{CreatedPeer, PeerService, PeerState};

/// Failures surfaced to callers of the peer lifecycle
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("No available IP addresses")]
    Exhausted,
    #[error("Peer not found: {0}")]
    NotFound(String),
    #[error("Invalid public key: {0:?}")]
    InvalidKey(String),
    #[error("Interface unavailable: {0}")]
    InterfaceUnavailable(#[from] ControlError),
    #[error("Configuration is corrupt: {0}")]
    ConfigCorrupt(String),
    #[error("Server public key is not configured and cannot be derived")]
    MissingServerKey,
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<AllocatorError> for PeerError {
    fn from(err: AllocatorError) -> Self {
        match err {
            AllocatorError::Exhausted(_) => PeerError::Exhausted,
            AllocatorError::Corrupt { .. } => PeerError::ConfigCorrupt(err.to_string()),
            other => PeerError::Storage(other.to_string()),
        }
    }
}

impl From<StoreError> for PeerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(e) => PeerError::ConfigCorrupt(e.to_string()),
            StoreError::InvalidKey(key) => PeerError::InvalidKey(key),
            other => PeerError::Storage(other.to_string()),
        }
    }
}

/// A peer as reported to API callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Peer {
    pub public_key: String,
    pub ip_address: Ipv4Addr,
    pub created_at: DateTime<Utc>,
    pub last_handshake: Option<DateTime<Utc>>,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
}
