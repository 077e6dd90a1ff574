//! CLI for inspecting and using a sharded deployment

use clap::{Parser, Subcommand};
use shardkv::common::parse_duration;
use shardkv::{ClusterConfig, ResolvedGroup, ShardRouter, ShardedClient};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardkv")]
#[command(about = "Sharded master/replica key-value client")]
#[command(version)]
struct Cli {
    /// Cluster configuration file (TOML)
    #[arg(long, default_value = "shardkv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve and print every group
    Topology {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which group and master own a key
    Route {
        /// Key
        key: String,
    },

    /// Get a value
    Get {
        /// Key
        key: String,
    },

    /// Set a value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },

    /// Refresh periodically and report master changes
    Watch {
        /// Refresh interval (e.g. 500ms, 5s, 1m)
        #[arg(long, default_value = "5s", value_parser = parse_interval)]
        interval: Duration,
    },
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ClusterConfig::load(&cli.config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Topology { json } => {
            let router = ShardRouter::initialize(config).await?;
            let groups = router.groups();
            if json {
                let view: Vec<&ResolvedGroup> = groups.iter().map(|g| g.as_ref()).collect();
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                for group in &groups {
                    print_group(group);
                }
            }
            router.shutdown();
        }

        Commands::Route { key } => {
            let router = ShardRouter::initialize(config).await?;
            let snapshot = router.snapshot();
            match snapshot.group_for(key.as_bytes()) {
                Some(group) => {
                    println!("Key: {}", key);
                    println!("  Group: {}", group.group_id);
                    match group.master_addr() {
                        Some(master) => println!("  Master: {}", master),
                        None => println!("  Master: none"),
                    }
                }
                None => println!("No group owns {}", key),
            }
            router.shutdown();
        }

        Commands::Get { key } => {
            // One-shot commands never need background refresh
            config.refresh_interval_ms = 0;
            let client = ShardedClient::connect(config).await?;
            match client.get(&key).await? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => println!("(nil)"),
            }
            client.shutdown();
        }

        Commands::Set { key, value } => {
            config.refresh_interval_ms = 0;
            let client = ShardedClient::connect(config).await?;
            client.set(&key, &value).await?;
            println!("OK");
            client.shutdown();
        }

        Commands::Watch { interval } => {
            watch(config, interval).await?;
        }
    }

    Ok(())
}

fn print_group(group: &ResolvedGroup) {
    println!("Group {}:", group.group_id);
    match &group.master {
        Some(master) => println!("  Master: {}", master.addr()),
        None => println!("  Master: none"),
    }
    for replica in &group.replicas {
        println!("  Replica: {}", replica.addr());
    }
    for node in &group.unreachable {
        println!("  Unreachable: {}", node.addr());
    }
}

async fn watch(config: ClusterConfig, interval: Duration) -> anyhow::Result<()> {
    let router = ShardRouter::initialize(config).await?;
    let mut masters = current_masters(&router);
    for group in router.groups() {
        print_group(&group);
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        if let Err(e) = router.refresh().await {
            tracing::warn!("Refresh failed: {}", e);
            continue;
        }

        let next = current_masters(&router);
        for (group_id, master) in &next {
            if masters.get(group_id) != Some(master) {
                println!(
                    "Group {}: master {} -> {}",
                    group_id,
                    masters
                        .get(group_id)
                        .cloned()
                        .flatten()
                        .unwrap_or_else(|| "none".into()),
                    master.clone().unwrap_or_else(|| "none".into())
                );
            }
        }
        masters = next;
    }

    router.shutdown();
    Ok(())
}

fn current_masters(router: &ShardRouter) -> BTreeMap<u32, Option<String>> {
    router
        .groups()
        .iter()
        .map(|g| (g.group_id, g.master_addr().map(|a| a.to_string())))
        .collect()
}
