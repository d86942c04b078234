use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wg_peerd::{Config, PeerService};

#[derive(Parser)]
#[command(name = "wg-peerd")]
#[command(about = "WireGuard peer provisioning daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./wg-peerd.toml, ~/.wg-peerd/config.toml, /etc/wg-peerd/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to listen on (overrides [api] listen)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },
    /// List peers on the live interface
    List,
    /// Show a single peer
    Show {
        /// Peer public key
        key: String,
    },
    /// Provision a new peer and print its client config
    Create,
    /// Remove a peer and release its address
    Delete {
        /// Peer public key
        key: String,
    },
    /// Generate default config file
    Init {
        /// Where to write the config
        #[arg(default_value = "wg-peerd.toml")]
        path: PathBuf,
    },
}

#[cfg(unix)]
fn warn_if_not_root() {
    if !nix::unistd::Uid::effective().is_root() {
        warn!("Not running as root; wg commands and config writes will likely fail");
    }
}

#[cfg(not(unix))]
fn warn_if_not_root() {}

fn open_service(config: &Config) -> Result<PeerService, Box<dyn std::error::Error>> {
    Ok(PeerService::from_config(config)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `create` output can be piped into a file
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path } => {
            info!("Generating default config...");
            Config::default().save(&path)?;
            println!("Created default config: {}", path.display());
        }
        Commands::Serve { listen } => {
            warn_if_not_root();
            let config = Config::discover(config_path)?;
            let service = Arc::new(open_service(&config)?);
            let listen = listen.unwrap_or(config.api.listen);
            info!(
                "Managing {} ({}) on {}",
                config.interface.name,
                config.interface.config_path.display(),
                config.pool.subnet
            );
            wg_peerd::api::serve(service, listen).await?;
        }
        Commands::List => {
            let config = Config::discover(config_path)?;
            let service = open_service(&config)?;
            let peers = service.list()?;
            if peers.is_empty() {
                println!("No peers");
            }
            for peer in peers {
                let handshake = peer
                    .last_handshake
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {}  handshake: {}  rx: {}  tx: {}",
                    peer.public_key, peer.ip_address, handshake, peer.transfer_rx, peer.transfer_tx
                );
            }
        }
        Commands::Show { key } => {
            let config = Config::discover(config_path)?;
            let service = open_service(&config)?;
            let peer = service.get(&key)?;
            println!("{}", serde_json::to_string_pretty(&peer)?);
        }
        Commands::Create => {
            warn_if_not_root();
            let config = Config::discover(config_path)?;
            let service = open_service(&config)?;
            let created = service.create()?;
            info!("Created peer {} at {}", created.public_key, created.ip_address);
            print!("{}", created.client_config);
        }
        Commands::Delete { key } => {
            warn_if_not_root();
            let config = Config::discover(config_path)?;
            let service = open_service(&config)?;
            if let Err(e) = service.delete(&key) {
                error!("Delete failed: {}", e);
                std::process::exit(1);
            }
            println!("Deleted peer {}", key);
        }
    }

    Ok(())
}
