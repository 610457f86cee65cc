//! Command-line interface and dispatch

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use devloop_core::Components;
use devloop_core::workload::env::parse_env;
use tracing::info;

use crate::config::Config;
use crate::error::CliError;
use crate::watch_loop;

/// Root CLI entrypoint
#[derive(Parser, Debug)]
#[command(
    name = "devloop",
    version,
    about = "Inner-loop developer workflow for OpenShift components",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Namespace to work in; overrides DEVLOOP_NAMESPACE and the kubeconfig
    #[arg(long, short = 'n', global = true, value_name = "NAMESPACE")]
    pub namespace: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Push local sources into the running container and restart the app
    Push {
        component: String,
        /// Directory holding the component sources
        local_root: PathBuf,
        /// Paths that changed, relative to the local root; empty pushes everything
        changed: Vec<PathBuf>,
    },
    /// Switch a component to dev mode on a builder image
    ToDev {
        component: String,
        /// `[namespace/]name[:tag]` of the builder image stream
        builder_image: String,
    },
    /// Switch a component back to build mode running an image
    ToBuild { component: String, image: String },
    /// Run a new build and wait for it
    Rebuild { component: String },
    /// Push changes under the local root as they happen
    Watch { component: String, local_root: PathBuf },
    /// Set environment variables on the component container
    Env {
        component: String,
        #[arg(required = true, value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },
    /// Attach or detach persistent volume claims
    #[command(subcommand)]
    Storage(StorageCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StorageCommand {
    /// Mount a claim into the component container
    Mount {
        component: String,
        claim: String,
        path: String,
    },
    /// Remove a claim's volume and mount from the component
    Unmount { component: String, claim: String },
}

impl Command {
    pub async fn run(self, components: &Components, config: &Config) -> Result<(), CliError> {
        match self {
            Command::Push {
                component,
                local_root,
                changed,
            } => {
                let manifest = components.push(&component, &local_root, &changed).await?;
                if manifest.is_empty() {
                    info!("Nothing left to push to {}", component);
                } else {
                    info!("Pushed {} entries to {}", manifest.entries.len(), component);
                }
            }
            Command::ToDev {
                component,
                builder_image,
            } => {
                components.to_dev_mode(&component, &builder_image).await?;
                info!("{} is in dev mode on {}", component, builder_image);
            }
            Command::ToBuild { component, image } => {
                components.to_build_mode(&component, &image).await?;
                info!("{} is in build mode on {}", component, image);
            }
            Command::Rebuild { component } => {
                let build = components.rebuild(&component).await?;
                info!("Build {} complete", build.metadata.name.unwrap_or_default());
            }
            Command::Watch {
                component,
                local_root,
            } => watch_loop::run(components, &component, &local_root, config.watch_interval).await?,
            Command::Env { component, vars } => {
                let vars = parse_env(&vars)?;
                components.patcher().add_env_vars(&component, &vars).await?;
                info!("Set {} env vars on {}", vars.len(), component);
            }
            Command::Storage(StorageCommand::Mount {
                component,
                claim,
                path,
            }) => {
                let volume = components
                    .patcher()
                    .add_claim_to_workload(&component, &claim, &path)
                    .await?;
                info!("Mounted {} at {} on {} as {}", claim, path, component, volume);
            }
            Command::Storage(StorageCommand::Unmount { component, claim }) => {
                let volume = components
                    .patcher()
                    .remove_claim_from_workload(&claim, &component)
                    .await?;
                info!("Removed {} ({}) from {}", claim, volume, component);
            }
        }
        Ok(())
    }
}
