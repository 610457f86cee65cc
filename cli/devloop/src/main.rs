//! devloop
//!
//! Inner-loop developer workflow against an OpenShift namespace:
//! - push: sync local sources into the running container and restart the app
//! - to-dev / to-build: switch a component between dev mode and build mode
//! - rebuild: run a new build and wait for it
//! - watch: push changes as they happen
//!
//! Configuration comes from `DEVLOOP_*` environment variables, the
//! `--namespace` flag and the standard kubeconfig.

mod commands;
mod config;
mod error;
mod watch_loop;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cluster_client::KubeClusterClient;
use devloop_core::Components;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;
use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if cli.namespace.is_some() {
        config.namespace = cli.namespace;
    }

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("from kubeconfig"));
    info!("  Update timeout: {:?}", config.settings.update_timeout);
    info!("  Claim size: {}", config.settings.claim_size);

    let client = KubeClusterClient::try_default(config.namespace.clone())
        .await
        .context("connect to cluster")?;
    let components = Components::new(Arc::new(client), config.settings.clone());

    cli.command.run(&components, &config).await?;
    Ok(())
}
