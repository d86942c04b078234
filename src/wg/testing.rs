//! In-memory stand-ins for the WireGuard tools, used by unit tests

use super::control::{ControlError, InterfaceControl};
use super::document::ConfigDocument;
use super::keys::{KeyGenerator, KeyPair};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct FakePeer {
    public_key: String,
    allowed_ips: Vec<String>,
    last_handshake: u64,
    rx_bytes: u64,
    tx_bytes: u64,
}

/// A live peer table kept in memory.
///
/// `reload` mirrors the peer blocks of the config file into the table, the
/// way `wg syncconf` would.
#[derive(Default)]
pub struct FakeInterface {
    peers: Mutex<Vec<FakePeer>>,
    extra_lines: Mutex<Vec<String>>,
    reloads: Mutex<Vec<PathBuf>>,
    reload_attempts: AtomicUsize,
    remove_calls: AtomicUsize,
    fail_add: AtomicBool,
    fail_remove: AtomicBool,
    fail_dump: AtomicBool,
    fail_reload: AtomicBool,
}

fn failure(command: &str) -> ControlError {
    ControlError::CommandFailed {
        command: command.to_string(),
        stderr: "Unable to access interface: No such device".to_string(),
    }
}

impl FakeInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_add(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dump(&self, fail: bool) {
        self.fail_dump.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reload(&self, fail: bool) {
        self.fail_reload.store(fail, Ordering::SeqCst);
    }

    /// Record traffic for a peer, as the kernel would after a handshake.
    pub fn set_traffic(&self, public_key: &str, handshake: u64, rx: u64, tx: u64) {
        if let Some(peer) = self
            .peers
            .lock()
            .iter_mut()
            .find(|p| p.public_key == public_key)
        {
            peer.last_handshake = handshake;
            peer.rx_bytes = rx;
            peer.tx_bytes = tx;
        }
    }

    /// Add a peer with arbitrary allowed ips, bypassing the config file.
    pub fn insert_peer(&self, public_key: &str, allowed_ips: &[&str]) {
        self.peers.lock().push(FakePeer {
            public_key: public_key.to_string(),
            allowed_ips: allowed_ips.iter().map(|s| s.to_string()).collect(),
            last_handshake: 0,
            rx_bytes: 0,
            tx_bytes: 0,
        });
    }

    /// Append a raw line to every dump.
    pub fn push_dump_line(&self, line: &str) {
        self.extra_lines.lock().push(line.to_string());
    }

    pub fn has_peer(&self, public_key: &str) -> bool {
        self.peers.lock().iter().any(|p| p.public_key == public_key)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn reloads(&self) -> Vec<PathBuf> {
        self.reloads.lock().clone()
    }

    pub fn reload_attempts(&self) -> usize {
        self.reload_attempts.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }
}

impl InterfaceControl for FakeInterface {
    fn add_peer(&self, public_key: &str, address: Ipv4Addr) -> Result<(), ControlError> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(failure("wg set"));
        }
        let mut peers = self.peers.lock();
        peers.retain(|p| p.public_key != public_key);
        peers.push(FakePeer {
            public_key: public_key.to_string(),
            allowed_ips: vec![format!("{}/32", address)],
            last_handshake: 0,
            rx_bytes: 0,
            tx_bytes: 0,
        });
        Ok(())
    }

    fn remove_peer(&self, public_key: &str) -> Result<(), ControlError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(failure("wg set"));
        }
        self.peers.lock().retain(|p| p.public_key != public_key);
        Ok(())
    }

    fn dump(&self) -> Result<String, ControlError> {
        if self.fail_dump.load(Ordering::SeqCst) {
            return Err(failure("wg show"));
        }
        let mut out = String::from("cHJpdmF0ZQ==\tc2VydmVy\t51820\toff\n");
        for peer in self.peers.lock().iter() {
            let allowed = if peer.allowed_ips.is_empty() {
                "(none)".to_string()
            } else {
                peer.allowed_ips.join(",")
            };
            out.push_str(&format!(
                "{}\t(none)\t(none)\t{}\t{}\t{}\t{}\toff\n",
                peer.public_key, allowed, peer.last_handshake, peer.rx_bytes, peer.tx_bytes
            ));
        }
        for line in self.extra_lines.lock().iter() {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    fn reload(&self, config_path: &Path) -> Result<(), ControlError> {
        self.reload_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_reload.load(Ordering::SeqCst) {
            return Err(failure("wg syncconf"));
        }

        if let Ok(text) = std::fs::read_to_string(config_path) {
            let doc = ConfigDocument::parse(&text).map_err(|e| ControlError::BadOutput {
                command: "wg-quick strip".to_string(),
                reason: e.to_string(),
            })?;
            let mut peers = self.peers.lock();
            let previous = std::mem::take(&mut *peers);
            for block in doc.peers() {
                let kept = previous
                    .iter()
                    .find(|p| p.public_key == block.public_key())
                    .cloned();
                peers.push(FakePeer {
                    allowed_ips: block
                        .addresses()
                        .iter()
                        .map(|ip| format!("{}/32", ip))
                        .collect(),
                    ..kept.unwrap_or(FakePeer {
                        public_key: block.public_key().to_string(),
                        allowed_ips: Vec::new(),
                        last_handshake: 0,
                        rx_bytes: 0,
                        tx_bytes: 0,
                    })
                });
            }
        }

        self.reloads.lock().push(config_path.to_path_buf());
        Ok(())
    }
}

/// Deterministic key generator: `PUB-1=`, `PUB-2=`, ...
#[derive(Default)]
pub struct FakeKeys {
    counter: AtomicUsize,
    fail: AtomicBool,
}

impl FakeKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl KeyGenerator for FakeKeys {
    fn generate(&self) -> Result<KeyPair, ControlError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(failure("wg genkey"));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(KeyPair {
            private_key: format!("PRIV-{}=", n),
            public_key: format!("PUB-{}=", n),
        })
    }

    fn public_key(&self, private_key: &str) -> Result<String, ControlError> {
        Ok(format!("PUBOF-{}", private_key))
    }
}
