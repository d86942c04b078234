//! WireGuard integration
//!
//! Everything that touches the interface config file or the live interface.
//!
//! # Layout
//!
//! - `document`: pure parser/renderer for the peer block grammar
//! - `store`: the config file on disk
//! - `dump`: pure parser for `wg show <iface> dump`
//! - `control`: the `InterfaceControl` seam and its `wg` implementation
//! - `keys`: key pair generation
//! - `reconciler`: live-interface operations used by the peer lifecycle

pub mod control;
pub mod document;
pub mod dump;
pub mod keys;
pub mod reconciler;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{ControlError, InterfaceControl, WgCommand};
pub use document::{ConfigDocument, DocumentError, PeerBlock};
pub use dump::{parse_dump, LivePeerStats};
pub use keys::{KeyGenerator, KeyPair, WgKeyGenerator};
pub use reconciler::Reconciler;
pub use store::{ConfigStore, StoreError};
