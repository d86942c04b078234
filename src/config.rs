//! Configuration handling for wg-peerd

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub interface: InterfaceConfig,
    pub pool: PoolConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Interface name as known to `wg` (e.g. "wg0")
    pub name: String,
    /// wg-quick style config file holding the preamble and peer blocks
    pub config_path: PathBuf,
    #[serde(default)]
    pub reload: ReloadStrategy,
}

/// How the on-disk document is pushed into the live interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStrategy {
    /// `wg-quick strip` + `wg syncconf`, keeps existing sessions up
    #[default]
    Syncconf,
    /// `systemctl restart wg-quick@<iface>`
    Restart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub subnet: Ipv4Net,
    /// The interface's own address, never handed to a peer
    pub server_address: Ipv4Addr,
    /// JSON file persisting the used address set
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub public_key: Option<String>,
    /// Public host clients dial; the machine hostname when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    pub port: u16,
    pub dns: String,
    pub persistent_keepalive: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: InterfaceConfig {
                name: "wg0".to_string(),
                config_path: PathBuf::from("/etc/wireguard/wg0.conf"),
                reload: ReloadStrategy::default(),
            },
            pool: PoolConfig {
                subnet: Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 24)
                    .unwrap_or_default(),
                server_address: Ipv4Addr::new(10, 0, 0, 1),
                state_path: PathBuf::from("data/ip_assignments.json"),
            },
            server: ServerConfig {
                public_key: None,
                endpoint: None,
                port: 51820,
                dns: "8.8.8.8".to_string(),
                persistent_keepalive: 25,
            },
            api: ApiConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the config file: explicit path, then the usual locations, then defaults.
    ///
    /// Environment overrides are applied and the result is validated.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Self::load(path)?
            }
            None => match Self::candidate_paths().into_iter().find(|p| p.exists()) {
                Some(path) => {
                    info!("Loading config from {}", path.display());
                    Self::load(&path)?
                }
                None => {
                    info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides_fn(|key| env::var(key));
        config.validate()?;
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("wg-peerd.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".wg-peerd").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/wg-peerd/config.toml"));
        paths
    }

    /// Apply environment overrides using a custom getter (for testing)
    pub fn apply_env_overrides_fn<F>(&mut self, get_var: F)
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        if let Ok(key) = get_var("WG_SERVER_PUBLIC_KEY") {
            debug!("Server public key taken from WG_SERVER_PUBLIC_KEY");
            self.server.public_key = Some(key);
        }
        if let Ok(endpoint) = get_var("WG_SERVER_ENDPOINT") {
            debug!("Server endpoint taken from WG_SERVER_ENDPOINT: {}", endpoint);
            self.server.endpoint = Some(endpoint);
        }
        if let Ok(name) = get_var("WG_INTERFACE") {
            self.interface.name = name;
        }
        if let Ok(path) = get_var("WG_CONFIG_PATH") {
            self.interface.config_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interface.name.is_empty() {
            return Err(ConfigError::invalid("interface.name", "must not be empty"));
        }

        let subnet = self.pool.subnet;
        if subnet.network() != subnet.addr() {
            return Err(ConfigError::invalid(
                "pool.subnet",
                format!("{} has host bits set, expected {}", subnet, subnet.trunc()),
            ));
        }
        if subnet.prefix_len() > 30 {
            return Err(ConfigError::invalid(
                "pool.subnet",
                "prefix length must be <= 30 for usable addresses",
            ));
        }

        let server = self.pool.server_address;
        if !subnet.contains(&server)
            || server == subnet.network()
            || server == subnet.broadcast()
        {
            return Err(ConfigError::invalid(
                "pool.server_address",
                format!("{} is not a host address of {}", server, subnet),
            ));
        }

        Ok(())
    }
}
