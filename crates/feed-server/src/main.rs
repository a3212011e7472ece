//! `feedd`: configuration-distribution control plane daemon

mod logging;
mod seed;
mod simulate;

use anyhow::Context;
use clap::{Parser, Subcommand};
use feed_core::{
    release_signals, ChannelBus, FeedConfig, FeedService, MemoryReleaseStore, SignalPublisher,
};
use feed_types::{ReleaseState, SignalKind};
use seed::SeedFile;
use simulate::SimulatorConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "feedd", version, about = "Configuration-distribution control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the coordinator and session sweeper until Ctrl-C
    Serve {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Releases to load into the in-memory store
        #[arg(long)]
        seed: Option<PathBuf>,
        /// Release store shards
        #[arg(long, default_value_t = 4)]
        shards: u32,
    },
    /// Simulate a fleet receiving a cluster-targeted release
    Simulate {
        /// Number of simulated agents
        #[arg(long, default_value_t = 1000)]
        agents: usize,
        /// Clusters the agents are spread across
        #[arg(long, default_value_t = 4)]
        clusters: usize,
        /// Agents per delivery wave, 0 for a single wave
        #[arg(long, default_value_t = 0)]
        step_size: usize,
        /// How long to wait for agents to converge
        #[arg(long, default_value_t = 5000)]
        settle_timeout_ms: u64,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and print the effective values
    CheckConfig {
        /// TOML configuration file
        #[arg(long)]
        config: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FeedConfig> {
    match path {
        Some(path) => {
            FeedConfig::load(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(FeedConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            seed,
            shards,
        } => {
            let config = load_config(config.as_deref())?;
            logging::init(&config.log)?;
            serve(config, seed.as_deref(), shards).await
        }
        Command::Simulate {
            agents,
            clusters,
            step_size,
            settle_timeout_ms,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            logging::init(&config.log)?;

            println!("Running feed simulation...");
            println!("Agents: {agents}");
            println!("Clusters: {clusters}");
            println!("Step Size: {step_size}");
            println!();

            let simulation = SimulatorConfig {
                agents,
                clusters,
                step_size,
                settle_timeout: Duration::from_millis(settle_timeout_ms),
            };
            let report = simulate::run(simulation, config).await?;
            println!("{}", report.generate_text());

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn serve(config: FeedConfig, seed: Option<&Path>, shards: u32) -> anyhow::Result<()> {
    let store = Arc::new(MemoryReleaseStore::new(shards));
    let (bus, subscription) = ChannelBus::new(config.bus.capacity);
    let bus = Arc::new(bus);
    let service = FeedService::new(config, store.clone(), bus.clone(), None);

    let runner = tokio::spawn(service.coordinator().run(subscription));
    let sweeper = service.spawn_sweeper();
    tracing::info!(shards, version = feed_core::VERSION, "feedd started");

    if let Some(path) = seed {
        let effective = SeedFile::load(path)?.apply(&store)?;
        for release in &effective {
            let kind = match release.state {
                ReleaseState::Rollbacked => SignalKind::Rollback,
                _ => SignalKind::Publish,
            };
            for signal in release_signals(release, kind, None) {
                bus.publish(&signal).await?;
            }
        }
        tracing::info!(releases = effective.len(), path = %path.display(), "seed applied");
    }

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!(sessions = service.registry().count(), "shutting down");

    sweeper.abort();
    drop(service);
    drop(bus);
    let processed = runner.await.context("coordinator task failed")?;
    tracing::info!(processed, "coordinator stopped");
    Ok(())
}
