//! meshd - TrustMesh control-plane daemon
//!
//! Subcommands: run the daemon, generate an identity keypair, print the
//! public identity, or sign a trust assertion for manual distribution.

use clap::{Parser, Subcommand};
use meshd::config::{AuthEntry, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trustmesh_core::KeyPair;
use trustmesh_net::PeerId;

#[derive(Parser, Debug)]
#[command(name = "meshd")]
#[command(about = "TrustMesh overlay-network control-plane daemon")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/meshd/meshd.conf", env = "MESHD_CONFIG")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon
    Run,
    /// Generate a new identity keypair
    Keygen,
    /// Print the public identity derived from the configuration
    Id,
    /// Sign a trust assertion for manual distribution
    Sign {
        /// Domain the key is authorized for
        domain: String,
        /// Base64 public key to authorize
        key: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let directive = if cli.verbose { "meshd=debug" } else { "meshd=info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(directive.parse().unwrap()))
        .init();

    match cli.command {
        Command::Keygen => {
            let keys = KeyPair::generate();
            println!("Public Key:\t{}", keys.public_b64());
            println!("Private Key:\t{}", keys.private_b64());
            println!("Peer ID:\t{}", PeerId::from_public_key(&keys.public_key()));
            ExitCode::SUCCESS
        }
        Command::Id => match Config::load(&cli.config).and_then(|c| meshd::get_id(&c)) {
            Ok((public, peer)) => {
                println!("Public Key:\t{}", public);
                println!("Peer ID:\t{}", peer);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{}", e);
                ExitCode::FAILURE
            }
        },
        Command::Sign { domain, key } => {
            let result = Config::load(&cli.config)
                .and_then(|config| meshd::sign_auth(&config, &domain, &key));
            match result {
                Ok(record) => {
                    let entry = AuthEntry::from_record(&record);
                    match serde_json::to_string_pretty(&entry) {
                        Ok(json) => {
                            println!("{}", json);
                            ExitCode::SUCCESS
                        }
                        Err(e) => {
                            error!("{}", e);
                            ExitCode::FAILURE
                        }
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Command::Run => {
            let config = match Config::load(&cli.config) {
                Ok(config) => config,
                Err(e) => {
                    error!("failed to load configuration: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = meshd::run(config).await {
                error!("server error: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
    }
}
