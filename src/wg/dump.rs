//! Parser for `wg show <iface> dump`
//!
//! The dump is tab separated, one record per line. Peer records carry:
//!
//! | # | Field | Example |
//! |---|-------|---------|
//! | 0 | public key | `xTIBA5rb...=` |
//! | 1 | preshared key | `(none)` |
//! | 2 | endpoint | `203.0.113.5:51820` or `(none)` |
//! | 3 | allowed ips | `10.0.0.2/32,fd00::2/128` |
//! | 4 | latest handshake (unix seconds) | `0` when never |
//! | 5 | transfer rx bytes | `1024` |
//! | 6 | transfer tx bytes | `2048` |
//! | 7 | persistent keepalive | `25` or `off` |
//!
//! `wg show all dump` prefixes every record with the interface name. The
//! interface's own record (private key, public key, port, fwmark) is skipped,
//! as is anything that does not fit the layout above: a single bad line never
//! costs the rest of the listing.

use tracing::warn;

const PEER_FIELDS: usize = 8;
const INTERFACE_FIELDS: usize = 4;

/// One peer as currently seen by the live interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePeerStats {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    /// Unix seconds of the latest handshake, `None` if the peer never connected
    pub last_handshake: Option<u64>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub persistent_keepalive: Option<u16>,
}

/// Parse a full dump, skipping records that do not parse.
pub fn parse_dump(output: &str) -> Vec<LivePeerStats> {
    output
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match parse_record(line) {
            Ok(Some(peer)) => Some(peer),
            Ok(None) => None,
            Err(reason) => {
                warn!("Skipping dump line {}: {}", idx + 1, reason);
                None
            }
        })
        .collect()
}

/// `Ok(None)` for interface records, `Err` for anything malformed.
fn parse_record(line: &str) -> Result<Option<LivePeerStats>, String> {
    let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();

    let fields = match fields.len() {
        PEER_FIELDS => &fields[..],
        n if n == PEER_FIELDS + 1 => &fields[1..],
        n if n == INTERFACE_FIELDS || n == INTERFACE_FIELDS + 1 => return Ok(None),
        n => return Err(format!("expected {} fields, found {}", PEER_FIELDS, n)),
    };

    let public_key = fields[0].trim();
    if public_key.is_empty() {
        return Err("empty public key".to_string());
    }

    let number = |idx: usize, name: &str| -> Result<u64, String> {
        fields[idx]
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("bad {} {:?}", name, fields[idx]))
    };

    let last_handshake = match number(4, "handshake")? {
        0 => None,
        secs => Some(secs),
    };
    let rx_bytes = number(5, "rx bytes")?;
    let tx_bytes = number(6, "tx bytes")?;

    let allowed_ips = none_if_empty(fields[3])
        .map(|ips| {
            ips.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let persistent_keepalive = match fields[7].trim() {
        "off" | "" => None,
        value => Some(
            value
                .parse::<u16>()
                .map_err(|_| format!("bad keepalive {:?}", value))?,
        ),
    };

    Ok(Some(LivePeerStats {
        public_key: public_key.to_string(),
        endpoint: none_if_empty(fields[2]).map(String::from),
        allowed_ips,
        last_handshake,
        rx_bytes,
        tx_bytes,
        persistent_keepalive,
    }))
}

fn none_if_empty(field: &str) -> Option<&str> {
    match field.trim() {
        "" | "(none)" => None,
        value => Some(value),
    }
}
