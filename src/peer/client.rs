//! Client-side config handed back when a peer is created

use crate::config::ServerConfig;
use std::net::Ipv4Addr;

/// Everything about the server a client config needs
#[derive(Debug, Clone)]
pub struct ClientTemplate {
    pub server_public_key: String,
    pub endpoint_host: String,
    pub port: u16,
    pub dns: String,
    pub persistent_keepalive: u16,
    pub prefix_len: u8,
}

impl ClientTemplate {
    pub fn new(server: &ServerConfig, server_public_key: String, prefix_len: u8) -> Self {
        let endpoint_host = server.endpoint.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        });

        Self {
            server_public_key,
            endpoint_host,
            port: server.port,
            dns: server.dns.clone(),
            persistent_keepalive: server.persistent_keepalive,
            prefix_len,
        }
    }

    fn endpoint(&self) -> String {
        if self.endpoint_host.contains(':') && !self.endpoint_host.starts_with('[') {
            format!("[{}]:{}", self.endpoint_host, self.port)
        } else {
            format!("{}:{}", self.endpoint_host, self.port)
        }
    }

    pub fn render(&self, private_key: &str, address: Ipv4Addr) -> String {
        format!(
            "[Interface]\n\
             PrivateKey = {private_key}\n\
             Address = {address}/{prefix}\n\
             DNS = {dns}\n\
             \n\
             [Peer]\n\
             PublicKey = {server_key}\n\
             Endpoint = {endpoint}\n\
             AllowedIPs = 0.0.0.0/0\n\
             PersistentKeepalive = {keepalive}\n",
            prefix = self.prefix_len,
            dns = self.dns,
            server_key = self.server_public_key,
            endpoint = self.endpoint(),
            keepalive = self.persistent_keepalive,
        )
    }
}
