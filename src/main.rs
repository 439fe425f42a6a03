// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use updraft::server::{run_server, ServerConfig, UpdraftConfig};
use updraft::signing::{load_certificate_chain, ManifestSigner};

#[derive(Parser)]
#[command(name = "updraft")]
#[command(author, version, about = "Over-the-air update server for Expo apps", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the update server
    Serve {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the bind address from the config file
        #[arg(short, long)]
        bind: Option<SocketAddr>,
    },
    /// Validate a configuration file and exit
    CheckConfig {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

/// Load the config file, or the defaults with env overrides when none is given
fn load_config(path: Option<&PathBuf>) -> Result<UpdraftConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            UpdraftConfig::load(path)
        }
        None => {
            let mut config = UpdraftConfig::default();
            config.override_admin_token(std::env::var(updraft::server::config::ADMIN_TOKEN_ENV).ok());
            config.validate()?;
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            let mut server_config: ServerConfig = load_config(config.as_ref())?.to_server_config()?;
            if let Some(bind) = bind {
                server_config.bind_addr = bind;
            }
            run_server(server_config).await
        }
        Commands::CheckConfig { config } => {
            let loaded = UpdraftConfig::load(&config)?;
            let server_config = loaded.to_server_config()?;
            if let Some(ref path) = server_config.signing_key_path {
                let signer = ManifestSigner::load_from_file(path)?;
                info!("Signing key {} ({})", signer.key_id(), signer.public_key_base64());
            }
            if let Some(ref path) = server_config.certificate_chain_path {
                load_certificate_chain(path)?;
            }
            println!("Configuration OK: {}", config.display());
            println!("  bind:    {}", server_config.bind_addr);
            println!("  storage: {:?}", server_config.storage);
            println!(
                "  signing: {}",
                if server_config.signing_key_path.is_some() { "enabled" } else { "disabled" }
            );
            println!(
                "  admin:   {}",
                if server_config.admin_token.is_some() { "token required" } else { "OPEN" }
            );
            Ok(())
        }
    }
}
