// Copyright (c) Mindchain, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use mind_wallet::config::NodeConfig;
use mind_wallet::node::Node;
use mind_wallet_config::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version)]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = NodeConfig::load(&args.config_path)?;
    info!(
        "loaded configuration for {} chains from {}",
        config.chains.len(),
        args.config_path.display()
    );
    // The metrics registry is scraped by the external HTTP surface;
    // the core only populates it.
    let node = Node::start(config).await?;

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}
