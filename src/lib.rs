//! wg-peerd - WireGuard peer provisioning
//!
//! Hands out peers on a single WireGuard interface: each peer gets a key
//! pair, an address from a managed subnet, a marked block in the interface
//! config file and an entry on the live interface. Deleting a peer undoes all
//! four.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML)
//! - `pool`: Persisted address allocator for the managed subnet
//! - `persist`: Atomic file replacement
//! - `wg`: Config document, live dump parsing and `wg` command integration
//! - `peer`: Peer records and the create/delete lifecycle
//! - `api`: HTTP surface
//!
//! # Usage
//!
//! ```bash
//! sudo wg-peerd serve --listen 127.0.0.1:8080
//! curl -X POST http://127.0.0.1:8080/peer
//! ```

pub mod api;
pub mod config;
pub mod peer;
pub mod persist;
pub mod pool;
pub mod wg;

pub use config::Config;
pub use peer::{CreatedPeer, Peer, PeerError, PeerService};
pub use pool::AddressAllocator;
