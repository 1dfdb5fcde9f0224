//! Coordination node binary

use clap::{Parser, Subcommand};
use coordnode::common::Config;
use coordnode::{Bootstrapper, ClientFactory, EmbeddedNode, ExtensionHooks, LocalEngine};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "coordnode")]
#[command(about = "Embedded coordination node and client")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a coordination node and serve until Ctrl-C
    Serve {
        /// Member name
        #[arg(long)]
        name: Option<String>,

        /// Listen address for clients
        #[arg(long)]
        client_addr: Option<String>,

        /// Listen address for peers
        #[arg(long)]
        peer_addr: Option<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Initial cluster, name=host:port pairs (comma-separated)
        #[arg(long)]
        initial_cluster: Option<String>,
    },
    /// Read a key
    Get {
        key: String,
        /// Treat the key as a prefix
        #[arg(long)]
        prefix: bool,
        #[arg(long, default_value = "127.0.0.1:2379")]
        endpoints: String,
    },
    /// Write a key
    Put {
        key: String,
        value: String,
        #[arg(long, default_value = "127.0.0.1:2379")]
        endpoints: String,
    },
    /// Delete a key
    Del {
        key: String,
        #[arg(long)]
        prefix: bool,
        #[arg(long, default_value = "127.0.0.1:2379")]
        endpoints: String,
    },
    /// Show member status
    Status {
        #[arg(long, default_value = "127.0.0.1:2379")]
        endpoints: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let factory = ClientFactory::from_config(&config.timeouts)?;

    match cli.command {
        Commands::Serve {
            name,
            client_addr,
            peer_addr,
            data_dir,
            initial_cluster,
        } => {
            // CLI has priority over file and environment
            let coord = &mut config.coordinator;
            if let Some(name) = name {
                coord.name = name;
            }
            if let Some(client_addr) = client_addr {
                coord.client_addr = client_addr;
            }
            if let Some(peer_addr) = peer_addr {
                coord.peer_addr = peer_addr;
            }
            if let Some(data_dir) = data_dir {
                coord.data_dir = data_dir;
            }
            if let Some(initial_cluster) = initial_cluster {
                coord.initial_cluster = initial_cluster;
            }

            let bootstrapper = Bootstrapper::new(LocalEngine::new())
                .with_startup_timeout(config.timeouts.startup_timeout()?);
            let abort = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            let mut node = bootstrapper
                .start_until(&config.coordinator, ExtensionHooks::none(), abort)
                .await?;
            tracing::info!("✓ {} ready on {}", node.name(), node.client_addr());

            tokio::signal::ctrl_c().await?;
            node.stop();
            node.close().await?;
        }
        Commands::Get {
            key,
            prefix,
            endpoints,
        } => {
            let client = factory.new_client(&endpoints)?;
            let kvs = if prefix {
                client.get_prefix(&key).await?
            } else {
                client.get(&key).await?.into_iter().collect()
            };
            for kv in kvs {
                println!("{}", kv.key);
                println!("{}", String::from_utf8_lossy(&kv.value));
            }
        }
        Commands::Put {
            key,
            value,
            endpoints,
        } => {
            let client = factory.new_client(&endpoints)?;
            let revision = client.put(&key, value).await?;
            println!("OK (revision {})", revision);
        }
        Commands::Del {
            key,
            prefix,
            endpoints,
        } => {
            let client = factory.new_client(&endpoints)?;
            let deleted = if prefix {
                client.delete_prefix(&key).await?
            } else {
                client.delete(&key).await?
            };
            println!("{}", deleted);
        }
        Commands::Status { endpoints } => {
            let client = factory.new_client(&endpoints)?;
            let status = client.status().await?;
            println!("name:      {}", status.name);
            println!("member id: {:016x}", status.member_id);
            println!("version:   {}", status.version);
            println!("revision:  {}", status.revision);
            for member in status.members {
                println!("  {} {:016x} {}", member.name, member.id, member.peer_addr);
            }
        }
    }

    Ok(())
}
