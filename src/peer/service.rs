//! Peer provisioning and removal
//!
//! Creation walks `Unprovisioned -> Allocating -> Configured -> Active`. Each
//! step reports how far it got, and a failure unwinds exactly what was done:
//!
//! | Failed at | Unwound |
//! |-----------|---------|
//! | config write | address |
//! | live add | config block, address |
//! | reload | live peer, config block, address |
//!
//! Removal walks `Active -> Removing -> Released`: live peer, config block,
//! reload, then address. Nothing is unwound on failure. Every step is
//! idempotent, and the address is resolved from the live table, the config
//! block or the pool lease, so retrying a half-finished delete picks up
//! where it stopped.

use super::client::ClientTemplate;
use super::directory::{pool_address, PeerDirectory};
use super::{Peer, PeerError};
use crate::config::{Config, ServerConfig};
use crate::pool::AddressAllocator;
use crate::wg::document::validate_key;
use crate::wg::{
    ConfigStore, InterfaceControl, KeyGenerator, Reconciler, WgCommand, WgKeyGenerator,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a peer stands in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unprovisioned,
    Allocating,
    Configured,
    Active,
    Removing,
    Released,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::Unprovisioned => "unprovisioned",
            PeerState::Allocating => "allocating",
            PeerState::Configured => "configured",
            PeerState::Active => "active",
            PeerState::Removing => "removing",
            PeerState::Released => "released",
        };
        f.write_str(name)
    }
}

fn transition(public_key: &str, from: PeerState, to: PeerState) {
    debug!("Peer {}: {} -> {}", public_key, from, to);
}

/// Progress of a creation at the point it failed
#[derive(Debug)]
enum Provisioning {
    /// Address reserved, nothing written
    Reserved { address: Ipv4Addr },
    /// Config block written, live interface untouched
    Configured {
        address: Ipv4Addr,
        previous_document: String,
    },
    /// Peer is on the live interface but the reload failed
    LiveAdded {
        address: Ipv4Addr,
        previous_document: String,
    },
}

/// Result of a successful creation
#[derive(Debug, Clone, Serialize)]
pub struct CreatedPeer {
    pub public_key: String,
    pub ip_address: Ipv4Addr,
    pub client_config: String,
}

/// Owns every mutation of the address pool, the config file and the live
/// interface on behalf of peer requests.
pub struct PeerService {
    allocator: Arc<AddressAllocator>,
    store: ConfigStore,
    reconciler: Arc<Reconciler>,
    directory: PeerDirectory,
    keys: Arc<dyn KeyGenerator>,
    server: ServerConfig,
    op_lock: Mutex<()>,
}

impl PeerService {
    pub fn new(
        config: &Config,
        control: Arc<dyn InterfaceControl>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Result<Self, PeerError> {
        let allocator = Arc::new(AddressAllocator::open(
            config.pool.subnet,
            config.pool.server_address,
            &config.pool.state_path,
        )?);
        let reconciler = Arc::new(Reconciler::new(control, &config.interface.config_path));

        Ok(Self {
            directory: PeerDirectory::new(reconciler.clone(), allocator.clone()),
            store: ConfigStore::new(&config.interface.config_path),
            allocator,
            reconciler,
            keys,
            server: config.server.clone(),
            op_lock: Mutex::new(()),
        })
    }

    /// Service driving the real `wg` tools for `config.interface`.
    pub fn from_config(config: &Config) -> Result<Self, PeerError> {
        Self::new(
            config,
            Arc::new(WgCommand::from_config(&config.interface)),
            Arc::new(WgKeyGenerator::new()),
        )
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    pub fn list(&self) -> Result<Vec<Peer>, PeerError> {
        self.directory.list_all()
    }

    pub fn get(&self, public_key: &str) -> Result<Peer, PeerError> {
        self.directory
            .get(public_key)?
            .ok_or_else(|| PeerError::NotFound(public_key.to_string()))
    }

    /// Server-side values for client configs.
    ///
    /// The server key comes from the config, or is derived from the
    /// interface's `PrivateKey` in the config file.
    pub fn client_template(&self) -> Result<ClientTemplate, PeerError> {
        let server_key = match &self.server.public_key {
            Some(key) => key.clone(),
            None => {
                let doc = self.store.document()?;
                let private_key = doc
                    .interface_value("PrivateKey")
                    .ok_or(PeerError::MissingServerKey)?;
                self.keys.public_key(private_key)?
            }
        };

        Ok(ClientTemplate::new(
            &self.server,
            server_key,
            self.allocator.subnet().prefix_len(),
        ))
    }

    /// Provision a new peer: keys, address, config block, live interface.
    pub fn create(&self) -> Result<CreatedPeer, PeerError> {
        let _guard = self.op_lock.lock();

        let template = self.client_template()?;
        let pair = self.keys.generate()?;
        let public_key = pair.public_key.as_str();

        transition(public_key, PeerState::Unprovisioned, PeerState::Allocating);
        let address = self.allocator.allocate(public_key)?;

        if let Err((progress, err)) = self.provision(public_key, address) {
            warn!("Creating peer {} failed: {}", public_key, err);
            self.compensate(public_key, progress);
            transition(public_key, PeerState::Allocating, PeerState::Unprovisioned);
            return Err(err);
        }

        transition(public_key, PeerState::Configured, PeerState::Active);
        info!("Peer {} created at {}", public_key, address);

        Ok(CreatedPeer {
            client_config: template.render(&pair.private_key, address),
            public_key: pair.public_key.clone(),
            ip_address: address,
        })
    }

    fn provision(&self, public_key: &str, address: Ipv4Addr) -> Result<(), (Provisioning, PeerError)> {
        let reserved = |e: PeerError| (Provisioning::Reserved { address }, e);

        let previous_document = self.store.read().map_err(|e| reserved(e.into()))?;
        self.store
            .upsert_peer(public_key, address)
            .map_err(|e| reserved(e.into()))?;
        transition(public_key, PeerState::Allocating, PeerState::Configured);

        if let Err(e) = self.reconciler.apply_peer_add(public_key, address) {
            return Err((
                Provisioning::Configured {
                    address,
                    previous_document,
                },
                e.into(),
            ));
        }

        if let Err(e) = self.reconciler.apply_reload() {
            return Err((
                Provisioning::LiveAdded {
                    address,
                    previous_document,
                },
                e.into(),
            ));
        }

        Ok(())
    }

    /// Undo a failed creation. Failures here are logged; the caller still
    /// reports the error that triggered the unwind.
    fn compensate(&self, public_key: &str, progress: Provisioning) {
        let (address, previous_document) = match progress {
            Provisioning::Reserved { address } => (address, None),
            Provisioning::Configured {
                address,
                previous_document,
            } => (address, Some(previous_document)),
            Provisioning::LiveAdded {
                address,
                previous_document,
            } => {
                if let Err(e) = self.reconciler.apply_peer_remove(public_key) {
                    error!("Rollback: failed to remove live peer {}: {}", public_key, e);
                }
                (address, Some(previous_document))
            }
        };

        if let Some(previous) = previous_document {
            match self.store.write(&previous) {
                Ok(()) => debug!("Rollback: restored {}", self.store.path().display()),
                Err(e) => error!("Rollback: failed to restore config for {}: {}", public_key, e),
            }
        }

        match self.allocator.release(address) {
            Ok(_) => debug!("Rollback: released {}", address),
            Err(e) => error!("Rollback: failed to release {}: {}", address, e),
        }
    }

    /// Remove a peer from the live interface, the config file and the pool.
    pub fn delete(&self, public_key: &str) -> Result<(), PeerError> {
        if validate_key(public_key).is_err() {
            return Err(PeerError::NotFound(public_key.to_string()));
        }

        let _guard = self.op_lock.lock();

        let address = self.resolve_address(public_key)?;

        transition(public_key, PeerState::Active, PeerState::Removing);

        self.reconciler.apply_peer_remove(public_key)?;
        self.store.remove_peer(public_key)?;
        self.reconciler.apply_reload()?;
        self.allocator.release(address)?;

        transition(public_key, PeerState::Removing, PeerState::Released);
        info!("Peer {} deleted, {} released", public_key, address);
        Ok(())
    }

    /// Address held by `public_key`: live table first, then its config
    /// block, then its lease in the pool.
    fn resolve_address(&self, public_key: &str) -> Result<Ipv4Addr, PeerError> {
        let live = self.reconciler.query_one(public_key)?;
        if let Some(address) = live
            .as_ref()
            .and_then(|stats| pool_address(&stats.allowed_ips, self.allocator.subnet()))
        {
            return Ok(address);
        }

        if let Some(address) = self.store.peer_address(public_key)? {
            info!("Peer {} not live, finishing removal from config", public_key);
            return Ok(address);
        }

        match self.allocator.address_of(public_key) {
            Some(address) => {
                info!("Peer {} only holds a lease, releasing {}", public_key, address);
                Ok(address)
            }
            None => Err(PeerError::NotFound(public_key.to_string())),
        }
    }
}
