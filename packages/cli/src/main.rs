mod commands;
mod node;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::config::AppConfig;
use tracing_subscriber::EnvFilter;

use crate::node::Node;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Store content across hot and cold storage tiers", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new instance and print its id and token
    Create,

    /// Import a file into hot storage and print its cid
    Add {
        #[arg(short, long, env = "STRATA_TOKEN")]
        token: String,

        #[arg(short, long)]
        file: PathBuf,
    },

    /// Push the default storage config for a cid and wait for it to settle
    Store {
        #[arg(short, long, env = "STRATA_TOKEN")]
        token: String,

        #[arg(short, long)]
        cid: String,

        /// Replace an existing config for the cid
        #[arg(long = "override")]
        override_config: bool,
    },

    /// Write the content of a cid to a file
    Get {
        #[arg(short, long, env = "STRATA_TOKEN")]
        token: String,

        #[arg(short, long)]
        cid: String,

        /// Output path; parent directories are created as needed
        #[arg(short, long)]
        out: PathBuf,

        /// Reconstruct the content from cold storage shards
        #[arg(long)]
        cold: bool,
    },

    /// Show the observed storage state of a cid
    Show {
        #[arg(short, long, env = "STRATA_TOKEN")]
        token: String,

        #[arg(short, long)]
        cid: String,
    },

    /// Show instance wallet and stored cids
    Info {
        #[arg(short, long, env = "STRATA_TOKEN")]
        token: String,
    },

    /// Stop managing a cid whose hot and cold storage are disabled
    Remove {
        #[arg(short, long, env = "STRATA_TOKEN")]
        token: String,

        #[arg(short, long)]
        cid: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load config")?;
    let node = Node::open(&config).await?;

    let result = match &cli.command {
        Commands::Create => commands::create(&node).await,
        Commands::Add { token, file } => commands::add(&node, token, file).await,
        Commands::Store {
            token,
            cid,
            override_config,
        } => commands::store(&node, token, cid, *override_config).await,
        Commands::Get {
            token,
            cid,
            out,
            cold,
        } => commands::get(&node, token, cid, out, *cold).await,
        Commands::Show { token, cid } => commands::show(&node, token, cid).await,
        Commands::Info { token } => commands::info(&node, token).await,
        Commands::Remove { token, cid } => commands::remove(&node, token, cid).await,
    };

    node.shutdown().await;
    result
}
