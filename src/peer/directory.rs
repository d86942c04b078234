//! Read-only view of the peers the live interface knows about

use super::{Peer, PeerError};
use crate::pool::AddressAllocator;
use crate::wg::{LivePeerStats, Reconciler};
use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

pub struct PeerDirectory {
    reconciler: Arc<Reconciler>,
    allocator: Arc<AddressAllocator>,
}

impl PeerDirectory {
    pub fn new(reconciler: Arc<Reconciler>, allocator: Arc<AddressAllocator>) -> Self {
        Self {
            reconciler,
            allocator,
        }
    }

    /// Every live peer holding an address in the pool subnet.
    pub fn list_all(&self) -> Result<Vec<Peer>, PeerError> {
        let live = self.reconciler.query_all()?;
        let total = live.len();
        let peers: Vec<Peer> = live.iter().filter_map(|s| self.to_peer(s)).collect();
        if peers.len() != total {
            debug!(
                "{} live peers outside {} not listed",
                total - peers.len(),
                self.allocator.subnet()
            );
        }
        Ok(peers)
    }

    pub fn get(&self, public_key: &str) -> Result<Option<Peer>, PeerError> {
        Ok(self
            .reconciler
            .query_one(public_key)?
            .and_then(|s| self.to_peer(&s)))
    }

    fn to_peer(&self, stats: &LivePeerStats) -> Option<Peer> {
        let ip_address = pool_address(&stats.allowed_ips, self.allocator.subnet())?;
        Some(Peer {
            public_key: stats.public_key.clone(),
            ip_address,
            created_at: self
                .allocator
                .allocated_at(ip_address)
                .unwrap_or_else(Utc::now),
            last_handshake: stats
                .last_handshake
                .and_then(|secs| i64::try_from(secs).ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            transfer_rx: stats.rx_bytes,
            transfer_tx: stats.tx_bytes,
        })
    }
}

/// First allowed-ip entry that is a single host of `subnet`.
pub(crate) fn pool_address(allowed_ips: &[String], subnet: Ipv4Net) -> Option<Ipv4Addr> {
    allowed_ips
        .iter()
        .filter_map(|entry| {
            entry
                .parse::<Ipv4Net>()
                .ok()
                .or_else(|| {
                    let ip = entry.parse::<Ipv4Addr>().ok()?;
                    Ipv4Net::new(ip, 32).ok()
                })
        })
        .find(|net| net.prefix_len() == 32 && subnet.contains(net))
        .map(|net| net.addr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wg::testing::FakeInterface;
    use tempfile::TempDir;

    fn setup(fake: Arc<FakeInterface>, dir: &TempDir) -> (PeerDirectory, Arc<AddressAllocator>) {
        let allocator = Arc::new(
            AddressAllocator::open(
                "10.66.66.0/24".parse().unwrap(),
                Ipv4Addr::new(10, 66, 66, 1),
                dir.path().join("ips.json"),
            )
            .unwrap(),
        );
        let reconciler = Arc::new(Reconciler::new(fake, dir.path().join("wg0.conf")));
        (PeerDirectory::new(reconciler, allocator.clone()), allocator)
    }

    #[test]
    fn test_pool_address() {
        let subnet: Ipv4Net = "10.66.66.0/24".parse().unwrap();
        let entries = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            pool_address(&entries(&["fd00::2/128", "10.66.66.7/32"]), subnet),
            Some(Ipv4Addr::new(10, 66, 66, 7))
        );
        assert_eq!(pool_address(&entries(&["0.0.0.0/0"]), subnet), None);
        assert_eq!(pool_address(&entries(&["192.168.1.5/32"]), subnet), None);
        assert_eq!(pool_address(&entries(&["10.66.66.0/25"]), subnet), None);
        assert_eq!(pool_address(&[], subnet), None);
    }

    #[test]
    fn test_list_reports_live_stats() {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeInterface::new());
        let (directory, allocator) = setup(fake.clone(), &dir);

        let ip = allocator.allocate("K1").unwrap();
        let allowed = format!("{}/32", ip);
        fake.insert_peer("K1", &[allowed.as_str()]);
        fake.set_traffic("K1", 1_700_000_000, 1024, 2048);

        let peers = directory.list_all().unwrap();

        assert_eq!(peers.len(), 1);
        let peer = &peers[0];
        assert_eq!(peer.public_key, "K1");
        assert_eq!(peer.ip_address, ip);
        assert_eq!(Some(peer.created_at), allocator.allocated_at(ip));
        assert_eq!(
            peer.last_handshake,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(peer.transfer_rx, 1024);
        assert_eq!(peer.transfer_tx, 2048);
    }

    #[test]
    fn test_list_skips_peers_outside_pool() {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeInterface::new());
        let (directory, _) = setup(fake.clone(), &dir);

        fake.insert_peer("SITE", &["0.0.0.0/0"]);
        fake.insert_peer("OTHER", &["192.168.9.9/32"]);
        fake.insert_peer("EMPTY", &[]);
        fake.insert_peer("K1", &["10.66.66.2/32"]);

        let peers = directory.list_all().unwrap();

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].public_key, "K1");
        // Untracked address, so no allocation time: falls back to now
        assert!(peers[0].created_at <= Utc::now());
        assert!(peers[0].last_handshake.is_none());
    }

    #[test]
    fn test_list_survives_malformed_dump_line() {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeInterface::new());
        let (directory, _) = setup(fake.clone(), &dir);

        fake.insert_peer("K1", &["10.66.66.2/32"]);
        fake.push_dump_line("garbage\tline");

        let peers = directory.list_all().unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_get() {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeInterface::new());
        let (directory, _) = setup(fake.clone(), &dir);

        fake.insert_peer("K1", &["10.66.66.2/32"]);

        assert_eq!(
            directory.get("K1").unwrap().unwrap().ip_address,
            Ipv4Addr::new(10, 66, 66, 2)
        );
        assert!(directory.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_unreachable_interface() {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeInterface::new());
        fake.fail_dump(true);
        let (directory, _) = setup(fake, &dir);

        assert!(matches!(
            directory.list_all(),
            Err(PeerError::InterfaceUnavailable(_))
        ));
    }
}
