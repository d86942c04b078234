//! Keeps the live interface in step with the config file

use super::control::{ControlError, InterfaceControl};
use super::dump::{parse_dump, LivePeerStats};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Drives the live interface on behalf of the peer lifecycle.
///
/// Errors are returned as-is; nothing here retries, a failing interface
/// usually means a bad config file and retrying would hide it.
pub struct Reconciler {
    control: Arc<dyn InterfaceControl>,
    config_path: PathBuf,
}

impl Reconciler {
    pub fn new(control: Arc<dyn InterfaceControl>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            control,
            config_path: config_path.into(),
        }
    }

    pub fn apply_peer_add(&self, public_key: &str, address: Ipv4Addr) -> Result<(), ControlError> {
        self.control.add_peer(public_key, address)?;
        info!("Live peer added: {} -> {}", public_key, address);
        Ok(())
    }

    pub fn apply_peer_remove(&self, public_key: &str) -> Result<(), ControlError> {
        self.control.remove_peer(public_key)?;
        info!("Live peer removed: {}", public_key);
        Ok(())
    }

    /// Push the on-disk document into the live interface.
    pub fn apply_reload(&self) -> Result<(), ControlError> {
        self.control.reload(&self.config_path)?;
        info!("Interface reloaded from {}", self.config_path.display());
        Ok(())
    }

    pub fn query_all(&self) -> Result<Vec<LivePeerStats>, ControlError> {
        let dump = self.control.dump()?;
        let peers = parse_dump(&dump);
        debug!("Live interface reports {} peers", peers.len());
        Ok(peers)
    }

    pub fn query_one(&self, public_key: &str) -> Result<Option<LivePeerStats>, ControlError> {
        Ok(self
            .query_all()?
            .into_iter()
            .find(|p| p.public_key == public_key))
    }
}
