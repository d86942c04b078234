//! Peer block grammar for the interface config file
//!
//! A document is free text (the `[Interface]` preamble and anything else an
//! operator put there) interleaved with managed peer blocks:
//!
//! ```text
//! # BEGIN_PEER <public_key>
//! [Peer]
//! PublicKey = <public_key>
//! AllowedIPs = <address>/32
//! # END_PEER <public_key>
//! ```
//!
//! Parsing keeps every byte, so `parse(text).render() == text`. Removing a
//! block drops exactly its lines, markers included.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use thiserror::Error;

pub const BEGIN_MARKER: &str = "# BEGIN_PEER";
pub const END_MARKER: &str = "# END_PEER";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Malformed peer block at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("Duplicate peer block for {0}")]
    DuplicatePeer(String),
    #[error("Invalid public key {0:?}")]
    InvalidKey(String),
}

/// Reject keys that could break out of a marker line.
pub fn validate_key(key: &str) -> Result<(), DocumentError> {
    if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(DocumentError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBlock {
    public_key: String,
    raw: String,
}

impl PeerBlock {
    fn new(public_key: &str, address: Ipv4Addr) -> Self {
        let raw = format!(
            "{BEGIN_MARKER} {key}\n[Peer]\nPublicKey = {key}\nAllowedIPs = {address}/32\n{END_MARKER} {key}\n",
            key = public_key,
        );
        Self {
            public_key: public_key.to_string(),
            raw,
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Single addresses granted by the block's `AllowedIPs` lines.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.raw
            .lines()
            .filter_map(|line| {
                let (name, value) = line.split_once('=')?;
                (name.trim() == "AllowedIPs").then_some(value)
            })
            .flat_map(|value| value.split(','))
            .filter_map(|entry| {
                let entry = entry.trim();
                match entry.parse::<Ipv4Net>() {
                    Ok(net) if net.prefix_len() == 32 => Some(net.addr()),
                    Ok(_) => None,
                    Err(_) => entry.parse().ok(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Peer(PeerBlock),
}

impl Segment {
    fn as_str(&self) -> &str {
        match self {
            Segment::Text(text) => text,
            Segment::Peer(block) => &block.raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    segments: Vec<Segment>,
}

enum Marker<'a> {
    Begin(&'a str),
    End(&'a str),
}

fn marker(line: &str) -> Option<Marker<'_>> {
    let content = line.trim_end_matches(['\n', '\r']);
    if let Some(rest) = content.strip_prefix(BEGIN_MARKER) {
        if rest.is_empty() || rest.starts_with(' ') {
            return Some(Marker::Begin(rest.trim_start_matches(' ')));
        }
    }
    if let Some(rest) = content.strip_prefix(END_MARKER) {
        if rest.is_empty() || rest.starts_with(' ') {
            return Some(Marker::End(rest.trim_start_matches(' ')));
        }
    }
    None
}

impl ConfigDocument {
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut current: Option<(usize, PeerBlock)> = None;

        for (idx, line) in text.split_inclusive('\n').enumerate() {
            let line_no = idx + 1;
            let malformed = |reason: String| DocumentError::Malformed {
                line: line_no,
                reason,
            };

            match marker(line) {
                Some(Marker::Begin(key)) => {
                    if let Some((_, open)) = &current {
                        return Err(malformed(format!(
                            "{} opened inside block for {}",
                            key, open.public_key
                        )));
                    }
                    validate_key(key).map_err(|_| malformed(format!("bad key {:?}", key)))?;
                    if segments
                        .iter()
                        .any(|s| matches!(s, Segment::Peer(b) if b.public_key == key))
                    {
                        return Err(DocumentError::DuplicatePeer(key.to_string()));
                    }
                    current = Some((
                        line_no,
                        PeerBlock {
                            public_key: key.to_string(),
                            raw: line.to_string(),
                        },
                    ));
                }
                Some(Marker::End(key)) => {
                    let Some((_, mut open)) = current.take() else {
                        return Err(malformed(format!("end marker for {} without begin", key)));
                    };
                    if key != open.public_key {
                        return Err(malformed(format!(
                            "end marker for {} closes block for {}",
                            key, open.public_key
                        )));
                    }
                    open.raw.push_str(line);
                    segments.push(Segment::Peer(open));
                }
                None => {
                    if let Some((_, open)) = current.as_mut() {
                        open.raw.push_str(line);
                    } else if let Some(Segment::Text(text)) = segments.last_mut() {
                        text.push_str(line);
                    } else {
                        segments.push(Segment::Text(line.to_string()));
                    }
                }
            }
        }

        if let Some((line, open)) = current {
            return Err(DocumentError::Malformed {
                line,
                reason: format!("block for {} is never closed", open.public_key),
            });
        }

        Ok(Self { segments })
    }

    pub fn render(&self) -> String {
        self.segments.iter().map(Segment::as_str).collect()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerBlock> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Peer(block) => Some(block),
            Segment::Text(_) => None,
        })
    }

    pub fn find(&self, public_key: &str) -> Option<&PeerBlock> {
        self.peers().find(|b| b.public_key == public_key)
    }

    /// Value of `name` in the `[Interface]` section, if present.
    pub fn interface_value(&self, name: &str) -> Option<&str> {
        let mut in_interface = false;
        for segment in &self.segments {
            let Segment::Text(text) = segment else {
                in_interface = false;
                continue;
            };
            for line in text.lines() {
                let line = line.trim();
                if line.starts_with('[') {
                    in_interface = line.eq_ignore_ascii_case("[Interface]");
                    continue;
                }
                if !in_interface {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    if key.trim().eq_ignore_ascii_case(name) {
                        return Some(value.trim());
                    }
                }
            }
        }
        None
    }

    /// Drop the block for `public_key`. Returns whether one existed.
    pub fn remove_peer(&mut self, public_key: &str) -> bool {
        let before = self.segments.len();
        self.segments
            .retain(|s| !matches!(s, Segment::Peer(b) if b.public_key == public_key));
        self.segments.len() != before
    }

    /// Drop every block granting `address`. Returns the keys removed.
    pub fn remove_address(&mut self, address: Ipv4Addr) -> Vec<String> {
        let mut removed = Vec::new();
        self.segments.retain(|s| match s {
            Segment::Peer(b) if b.addresses().contains(&address) => {
                removed.push(b.public_key.clone());
                false
            }
            _ => true,
        });
        removed
    }

    /// Append a block for `public_key` at the end of the document.
    ///
    /// If the document does not end in a newline, one is added before the
    /// block, so removing the block again leaves that newline behind.
    pub fn append_peer(&mut self, public_key: &str, address: Ipv4Addr) -> Result<(), DocumentError> {
        validate_key(public_key)?;
        if self.find(public_key).is_some() {
            return Err(DocumentError::DuplicatePeer(public_key.to_string()));
        }

        // A marker must start its own line
        if let Some(Segment::Text(text)) = self.segments.last_mut() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
        }

        self.segments
            .push(Segment::Peer(PeerBlock::new(public_key, address)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREAMBLE: &str = "[Interface]\n\
                            Address = 10.66.66.1/24\n\
                            ListenPort = 51820\n\
                            PrivateKey = c2VydmVyLXByaXZhdGU=\n\n";

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_block_format() {
        let mut doc = ConfigDocument::default();
        doc.append_peer("K1", ip("10.66.66.2")).unwrap();

        assert_eq!(
            doc.render(),
            "# BEGIN_PEER K1\n[Peer]\nPublicKey = K1\nAllowedIPs = 10.66.66.2/32\n# END_PEER K1\n"
        );
    }

    #[test]
    fn test_parse_render_is_lossless() {
        let text = format!(
            "{PREAMBLE}# BEGIN_PEER A=\r\n[Peer]\r\nPublicKey = A=\r\nAllowedIPs = 10.66.66.2/32\r\n# END_PEER A=\r\n\
             # stray operator comment\n\
             # BEGIN_PEER B=\n[Peer]\nPublicKey = B=\nAllowedIPs = 10.66.66.3/32\n# END_PEER B="
        );

        let doc = ConfigDocument::parse(&text).unwrap();

        assert_eq!(doc.render(), text);
        let keys: Vec<_> = doc.peers().map(PeerBlock::public_key).collect();
        assert_eq!(keys, vec!["A=", "B="]);
    }

    #[test]
    fn test_remove_peer_takes_exact_bytes() {
        let text = format!(
            "{PREAMBLE}# BEGIN_PEER A\n[Peer]\nPublicKey = A\nAllowedIPs = 10.66.66.2/32\n# END_PEER A\n\
             # keep me\n\
             # BEGIN_PEER B\n[Peer]\nPublicKey = B\nAllowedIPs = 10.66.66.3/32\n# END_PEER B\n"
        );
        let mut doc = ConfigDocument::parse(&text).unwrap();

        assert!(doc.remove_peer("A"));

        assert_eq!(
            doc.render(),
            format!(
                "{PREAMBLE}# keep me\n\
                 # BEGIN_PEER B\n[Peer]\nPublicKey = B\nAllowedIPs = 10.66.66.3/32\n# END_PEER B\n"
            )
        );
    }

    #[test]
    fn test_remove_absent_peer_is_noop() {
        let text = format!("{PREAMBLE}# BEGIN_PEER A\n[Peer]\nPublicKey = A\n# END_PEER A\n");
        let mut doc = ConfigDocument::parse(&text).unwrap();

        assert!(!doc.remove_peer("nobody"));
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn test_append_then_remove_restores_bytes() {
        let mut doc = ConfigDocument::parse(PREAMBLE).unwrap();

        doc.append_peer("K1", ip("10.66.66.2")).unwrap();
        assert_ne!(doc.render(), PREAMBLE);
        doc.remove_peer("K1");

        assert_eq!(doc.render(), PREAMBLE);
    }

    #[test]
    fn test_append_after_unterminated_line() {
        let mut doc = ConfigDocument::parse("[Interface]\nListenPort = 51820").unwrap();
        doc.append_peer("K1", ip("10.0.0.2")).unwrap();

        assert!(doc
            .render()
            .starts_with("[Interface]\nListenPort = 51820\n# BEGIN_PEER K1\n"));
        doc.remove_peer("K1");
        assert_eq!(doc.render(), "[Interface]\nListenPort = 51820\n");
    }

    #[test]
    fn test_remove_address() {
        let text = "# BEGIN_PEER A\n[Peer]\nPublicKey = A\nAllowedIPs = 10.0.0.2/32, fd00::2/128\n# END_PEER A\n\
                    # BEGIN_PEER B\n[Peer]\nPublicKey = B\nAllowedIPs = 10.0.0.3/32\n# END_PEER B\n\
                    # BEGIN_PEER C\n[Peer]\nPublicKey = C\nAllowedIPs = 10.0.0.0/24\n# END_PEER C\n";
        let mut doc = ConfigDocument::parse(text).unwrap();

        assert_eq!(doc.remove_address(ip("10.0.0.2")), vec!["A".to_string()]);
        assert!(doc.remove_address(ip("10.0.0.9")).is_empty());
        // a covering range is not an assignment of that address
        assert!(doc.remove_address(ip("10.0.0.5")).is_empty());
        assert_eq!(doc.peers().count(), 2);
    }

    #[test]
    fn test_block_addresses() {
        let mut doc = ConfigDocument::default();
        doc.append_peer("K", ip("10.1.2.3")).unwrap();
        assert_eq!(doc.find("K").unwrap().addresses(), vec![ip("10.1.2.3")]);
    }

    #[test]
    fn test_unterminated_block_is_corrupt() {
        let text = "# BEGIN_PEER A\n[Peer]\nPublicKey = A\n";
        let err = ConfigDocument::parse(text).unwrap_err();
        assert!(matches!(err, DocumentError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_mismatched_or_stray_markers_are_corrupt() {
        let mismatched = "# BEGIN_PEER A\n[Peer]\n# END_PEER B\n";
        assert!(matches!(
            ConfigDocument::parse(mismatched),
            Err(DocumentError::Malformed { line: 3, .. })
        ));

        let nested = "# BEGIN_PEER A\n# BEGIN_PEER B\n# END_PEER B\n# END_PEER A\n";
        assert!(matches!(
            ConfigDocument::parse(nested),
            Err(DocumentError::Malformed { line: 2, .. })
        ));

        let stray = "[Interface]\n# END_PEER A\n";
        assert!(matches!(
            ConfigDocument::parse(stray),
            Err(DocumentError::Malformed { line: 2, .. })
        ));

        let keyless = "# BEGIN_PEER\n# END_PEER\n";
        assert!(ConfigDocument::parse(keyless).is_err());
    }

    #[test]
    fn test_duplicate_block_is_corrupt() {
        let text = "# BEGIN_PEER A\n# END_PEER A\n# BEGIN_PEER A\n# END_PEER A\n";
        assert_eq!(
            ConfigDocument::parse(text),
            Err(DocumentError::DuplicatePeer("A".to_string()))
        );
    }

    #[test]
    fn test_marker_prefix_lookalikes_are_text() {
        let text = "# BEGIN_PEERS are listed below\n# END_PEERING notes\n";
        let doc = ConfigDocument::parse(text).unwrap();
        assert_eq!(doc.peers().count(), 0);
        assert_eq!(doc.render(), text);
    }

    #[test]
    fn test_interface_value() {
        let text = format!(
            "{PREAMBLE}# BEGIN_PEER A\n[Peer]\nPublicKey = A\n# END_PEER A\n\
             [Peer]\nPrivateKey = not-the-interface\n"
        );
        let doc = ConfigDocument::parse(&text).unwrap();

        assert_eq!(doc.interface_value("PrivateKey"), Some("c2VydmVyLXByaXZhdGU="));
        assert_eq!(doc.interface_value("listenport"), Some("51820"));
        assert_eq!(doc.interface_value("DNS"), None);
        assert_eq!(ConfigDocument::default().interface_value("PrivateKey"), None);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("abc\n# END_PEER abc").is_err());
        assert!(validate_key("with space").is_err());
        assert!(validate_key("tab\there").is_err());
    }

    #[test]
    fn test_append_rejects_bad_or_duplicate_key() {
        let mut doc = ConfigDocument::default();
        assert!(matches!(
            doc.append_peer("bad\nkey", ip("10.0.0.2")),
            Err(DocumentError::InvalidKey(_))
        ));

        doc.append_peer("K", ip("10.0.0.2")).unwrap();
        assert!(matches!(
            doc.append_peer("K", ip("10.0.0.3")),
            Err(DocumentError::DuplicatePeer(_))
        ));
    }
}
