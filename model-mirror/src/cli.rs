//! Command-line glue for model-mirror.
//!
//! Parses arguments, loads configuration and wires the hub client, disk probe
//! and admission queue from [`model_mirror_core`] together. Per-repository
//! failures end up in the printed status table; only configuration problems
//! make the command fail.

use crate::load_config::{load_config, HubEnv};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use model_mirror_core::contract::RepoId;
use model_mirror_core::hub::HubClient;
use model_mirror_core::ledger::Ledger;
use model_mirror_core::pipeline::{Pipeline, PipelineSettings};
use model_mirror_core::probe::DiskProbe;
use model_mirror_core::queue::AdmissionQueue;
use std::path::PathBuf;
use std::sync::Arc;

/// CLI for model-mirror: copy model repositories into your own hub namespace.
#[derive(Parser)]
#[clap(
    name = "model-mirror",
    version,
    about = "Bulk-copy model repositories from one hub namespace to another under a disk space budget"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mirror every configured repository into ORG_NAME
    Mirror {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Extra `namespace/name` repositories appended to the configured list
        #[clap(long = "repo")]
        repos: Vec<RepoId>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Mirror { config, repos } => {
            let mut config = load_config(config)?;
            config.repositories.extend(repos);
            let budget = config
                .budget
                .to_budget()
                .context("Invalid disk space budget")?;
            let hub_env = HubEnv::from_env()?;

            tracing::info!(
                command = "mirror",
                repositories = config.repositories.len(),
                org_name = %hub_env.org_name,
                "Starting mirror run"
            );
            if config.repositories.is_empty() {
                tracing::warn!(command = "mirror", "No repositories configured, nothing to do");
            }

            let hub = Arc::new(
                HubClient::new(&hub_env.endpoint, hub_env.token.clone())?
                    .with_private_repos(config.private),
            );
            let settings = PipelineSettings {
                local_root: config.local_dir.clone(),
                org_name: hub_env.org_name.clone(),
                license_policy: config.license_policy(),
                hub_endpoint: hub_env.endpoint.clone(),
            };
            let pipeline = Pipeline::new(Arc::clone(&hub), hub, settings);
            let probe = Arc::new(DiskProbe::new(&config.local_dir));

            let mut queue = AdmissionQueue::new(pipeline, probe, budget);
            if let Some(path) = &config.ledger {
                let ledger = Ledger::open(path)
                    .with_context(|| format!("Failed to open completion ledger {path:?}"))?;
                queue = queue.with_ledger(ledger);
            }

            let report = queue.run(config.repositories).await;
            tracing::info!(command = "mirror", "Mirror run complete");
            println!("{report}");
            Ok(())
        }
    }
}
