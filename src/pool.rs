//! Address allocation for provisioned peers
//!
//! Hands out host addresses from the managed subnet, lowest first, and keeps
//! the used set on disk so assignments survive a restart.
//!
//! The on-disk format is a small JSON document:
//!
//! ```json
//! {
//!   "used_ips": ["10.0.0.1", "10.0.0.2"],
//!   "leases": { "10.0.0.2": { "public_key": "xTIB...=", "allocated_at": "2026-01-01T00:00:00Z" } }
//! }
//! ```
//!
//! Files holding only `used_ips` load fine; those addresses have no owner.
//!
//! The server's own address is always present in `used_ips` and is never
//! handed out or released.

use crate::persist::{write_atomic, PersistError};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("No available IP addresses in {0}")]
    Exhausted(Ipv4Net),
    #[error("Address state file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("Failed to read address state: {0}")]
    ReadError(#[from] io::Error),
    #[error("Failed to encode address state: {0}")]
    EncodeError(#[from] serde_json::Error),
    #[error(transparent)]
    PersistError(#[from] PersistError),
}

/// Who holds an address and since when
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lease {
    public_key: String,
    allocated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PoolState {
    used_ips: BTreeSet<Ipv4Addr>,
    #[serde(default)]
    leases: BTreeMap<Ipv4Addr, Lease>,
}

/// Persisted address pool.
///
/// Every mutation holds the lock across read-modify-persist; the in-memory
/// set is only replaced after the new state reached disk, so a failed write
/// leaves both views unchanged.
pub struct AddressAllocator {
    subnet: Ipv4Net,
    reserved: Ipv4Addr,
    state_path: PathBuf,
    state: Mutex<PoolState>,
}

impl AddressAllocator {
    /// Open the pool, loading the used set from `state_path` if it exists.
    pub fn open(
        subnet: Ipv4Net,
        reserved: Ipv4Addr,
        state_path: impl Into<PathBuf>,
    ) -> Result<Self, AllocatorError> {
        let state_path = state_path.into();
        let mut state = Self::load(&state_path, subnet, reserved)?;
        state.used_ips.insert(reserved);

        info!(
            "Address pool {} opened: reserved={}, in use={}",
            subnet,
            reserved,
            state.used_ips.len() - 1
        );

        Ok(Self {
            subnet,
            reserved,
            state_path,
            state: Mutex::new(state),
        })
    }

    fn load(path: &Path, subnet: Ipv4Net, reserved: Ipv4Addr) -> Result<PoolState, AllocatorError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No address state at {}, starting fresh", path.display());
                return Ok(PoolState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| AllocatorError::Corrupt {
            path: path.display().to_string(),
            reason,
        };

        let state: PoolState =
            serde_json::from_str(&content).map_err(|e| corrupt(e.to_string()))?;

        for ip in &state.used_ips {
            if *ip != reserved && !is_host(subnet, *ip) {
                return Err(corrupt(format!("{} is not a host address of {}", ip, subnet)));
            }
        }

        Ok(state)
    }

    fn save(&self, state: &PoolState) -> Result<(), AllocatorError> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.state_path, &json)?;
        Ok(())
    }

    /// Reserve the lowest free host address for `public_key`.
    pub fn allocate(&self, public_key: &str) -> Result<Ipv4Addr, AllocatorError> {
        let mut state = self.state.lock();

        let ip = self
            .subnet
            .hosts()
            .find(|ip| *ip != self.reserved && !state.used_ips.contains(ip))
            .ok_or_else(|| {
                warn!(
                    "Address pool {} exhausted ({} of {} in use)",
                    self.subnet,
                    state.used_ips.len() - 1,
                    self.capacity()
                );
                AllocatorError::Exhausted(self.subnet)
            })?;

        let mut next = state.clone();
        next.used_ips.insert(ip);
        next.leases.insert(
            ip,
            Lease {
                public_key: public_key.to_string(),
                allocated_at: Utc::now(),
            },
        );
        self.save(&next)?;
        *state = next;

        debug!(
            "Allocated {} to {} ({} in use)",
            ip,
            public_key,
            state.used_ips.len() - 1
        );
        Ok(ip)
    }

    /// Return an address to the pool.
    ///
    /// Releasing an untracked address (or the reserved one) changes nothing.
    /// Returns whether the address was in use.
    pub fn release(&self, ip: Ipv4Addr) -> Result<bool, AllocatorError> {
        if ip == self.reserved {
            warn!("Refusing to release reserved address {}", ip);
            return Ok(false);
        }

        let mut state = self.state.lock();
        if !state.used_ips.contains(&ip) {
            debug!("Release of untracked address {} ignored", ip);
            return Ok(false);
        }

        let mut next = state.clone();
        next.used_ips.remove(&ip);
        next.leases.remove(&ip);
        self.save(&next)?;
        *state = next;

        debug!("Released {} ({} in use)", ip, state.used_ips.len() - 1);
        Ok(true)
    }

    /// When `ip` was handed out by this pool, if known.
    pub fn allocated_at(&self, ip: Ipv4Addr) -> Option<DateTime<Utc>> {
        self.state.lock().leases.get(&ip).map(|lease| lease.allocated_at)
    }

    /// Address leased to `public_key`, if any.
    pub fn address_of(&self, public_key: &str) -> Option<Ipv4Addr> {
        self.state
            .lock()
            .leases
            .iter()
            .find(|(ip, lease)| lease.public_key == public_key && **ip != self.reserved)
            .map(|(ip, _)| *ip)
    }

    #[must_use]
    pub fn is_allocated(&self, ip: Ipv4Addr) -> bool {
        ip != self.reserved && self.state.lock().used_ips.contains(&ip)
    }

    /// Addresses currently assigned to peers, ascending.
    pub fn assigned(&self) -> Vec<Ipv4Addr> {
        self.state
            .lock()
            .used_ips
            .iter()
            .copied()
            .filter(|ip| *ip != self.reserved)
            .collect()
    }

    /// Number of peer addresses the subnet can hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.subnet.hosts().filter(|ip| *ip != self.reserved).count()
    }

    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    pub fn reserved(&self) -> Ipv4Addr {
        self.reserved
    }
}

fn is_host(subnet: Ipv4Net, ip: Ipv4Addr) -> bool {
    subnet.contains(&ip) && ip != subnet.network() && ip != subnet.broadcast()
}
