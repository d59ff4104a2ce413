mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bitstore_agent::{from_config, BitStoreConfig};

const DEFAULT_CONFIG_PATH: &str = "bitstore.toml";

#[derive(Parser)]
#[command(name = "bitstore")]
#[command(about = "Store and inspect bitstreams in a configured asset store")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true, env = "BITSTORE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and make sure the container exists
    Init,
    /// Store a file as a new bitstream
    Put(commands::PutArgs),
    /// Write a stored bitstream to a file or stdout
    Get(commands::GetArgs),
    /// Show technical metadata for a stored bitstream
    About(commands::AboutArgs),
    /// Delete a stored bitstream
    Remove(commands::RemoveArgs),
    /// Round-trip a file through the store and verify it
    Check(commands::CheckArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = BitStoreConfig::load(&cli.config)?;
    info!(backend = %config.backend, config = %cli.config.display(), "bitstore starting");

    let mut store = from_config(config)?;
    store.init().await.context("Failed to initialize bitstore")?;

    match cli.command {
        Command::Init => {
            info!("Bitstore initialized");
            Ok(())
        }
        Command::Put(args) => commands::put(store.as_ref(), args).await,
        Command::Get(args) => commands::get(store.as_ref(), args).await,
        Command::About(args) => commands::about(store.as_ref(), args).await,
        Command::Remove(args) => commands::remove(store.as_ref(), args).await,
        Command::Check(args) => commands::check(store.as_ref(), args).await,
    }
}
