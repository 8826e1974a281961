//! Orb CLI
//!
//! Runs a witnessing node and administers the witness policy and accept
//! lists of a running one.

mod client;

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand};
use client::{AcceptListRequest, AdminClient};
use ed25519_dalek::SigningKey;
use orb_node::{logging, NodeConfig, OrbNode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orb")]
#[command(version)]
#[command(about = "Orb - DID anchor witnessing node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an Orb node
    Start {
        /// Configuration file path
        #[arg(short, long, env = "ORB_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Manage the witness policy
    Policy {
        #[command(subcommand)]
        policy: PolicyCommands,
    },

    /// Manage accept lists
    Acceptlist {
        #[command(subcommand)]
        acceptlist: AcceptListCommands,
    },

    /// Generate a base64 Ed25519 signing key for `node.signing_key`
    Keygen,
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Replace the witness policy
    Update {
        /// Policy, e.g. "OutOf(1,system) LogRequired"
        #[arg(long)]
        policy: String,

        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Show the witness policy
    Get {
        #[command(flatten)]
        endpoint: Endpoint,
    },
}

#[derive(Subcommand)]
enum AcceptListCommands {
    /// Add URIs to an accept list
    Add {
        /// Accept list type: follow or invite-witness
        #[arg(long = "type")]
        list_type: String,

        /// URI to add (repeatable)
        #[arg(long = "actor", required = true)]
        actors: Vec<String>,

        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Remove URIs from an accept list
    Remove {
        #[arg(long = "type")]
        list_type: String,

        /// URI to remove (repeatable)
        #[arg(long = "actor", required = true)]
        actors: Vec<String>,

        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Show accept lists
    Get {
        /// Only this type; every list when omitted
        #[arg(long = "type")]
        list_type: Option<String>,

        #[command(flatten)]
        endpoint: Endpoint,
    },
}

#[derive(clap::Args)]
struct Endpoint {
    /// Endpoint URL
    #[arg(long)]
    url: String,

    /// Bearer token
    #[arg(long, env = "ORB_AUTH_TOKEN")]
    auth_token: Option<String>,
}

impl Endpoint {
    fn client(&self) -> AdminClient {
        AdminClient::new(self.auth_token.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => {
            let mut config = NodeConfig::load(config.as_deref())?;
            if cli.verbose {
                config.logging.level = "debug".to_string();
            }
            logging::init(&config.logging)?;

            tracing::info!(node = %config.node.name, "Loaded configuration");

            let node = OrbNode::new(config)?;
            node.run().await?;
        }

        Commands::Policy { policy } => {
            init_logging(cli.verbose)?;

            match policy {
                PolicyCommands::Update { policy, endpoint } => {
                    endpoint.client().update_policy(&endpoint.url, &policy).await?;
                    println!("Witness policy updated");
                }
                PolicyCommands::Get { endpoint } => {
                    let policy = endpoint.client().get_policy(&endpoint.url).await?;
                    println!("{policy}");
                }
            }
        }

        Commands::Acceptlist { acceptlist } => {
            init_logging(cli.verbose)?;

            match acceptlist {
                AcceptListCommands::Add {
                    list_type,
                    actors,
                    endpoint,
                } => {
                    let request = AcceptListRequest {
                        list_type,
                        add: actors,
                        remove: Vec::new(),
                    };
                    endpoint.client().update_accept_list(&endpoint.url, &request).await?;
                    println!("Accept list updated");
                }
                AcceptListCommands::Remove {
                    list_type,
                    actors,
                    endpoint,
                } => {
                    let request = AcceptListRequest {
                        list_type,
                        add: Vec::new(),
                        remove: actors,
                    };
                    endpoint.client().update_accept_list(&endpoint.url, &request).await?;
                    println!("Accept list updated");
                }
                AcceptListCommands::Get { list_type, endpoint } => {
                    let lists = endpoint
                        .client()
                        .get_accept_list(&endpoint.url, list_type.as_deref())
                        .await?;
                    println!("{lists}");
                }
            }
        }

        Commands::Keygen => {
            let key = SigningKey::generate(&mut rand::rngs::OsRng);
            println!("signing_key = \"{}\"", STANDARD.encode(key.to_bytes()));
            println!("# public key: {}", STANDARD.encode(key.verifying_key().to_bytes()));
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let config = orb_node::LoggingConfig {
        level: if verbose { "debug" } else { "warn" }.to_string(),
        ..Default::default()
    };
    logging::init(&config)
}
