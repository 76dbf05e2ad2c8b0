//! BlockCtl - Command line tool for blockd lock servers
//!
//! Usage:
//!   blockctl show                  - List locks held across the cluster
//!   blockctl acquire <id> --hold 30 - Take a lock and keep it for 30 seconds
//!   blockctl route <id>            - Show which node owns a lock id

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blockd::config::{BlockdConfig, NodeConfig};
use blockd::error::{Error, Result};
use blockd::protocol::{CodecKind, LockMode};
use blockd::ClusterRouter;

/// Blockd Lock Server Control Tool
#[derive(Parser)]
#[command(name = "blockctl")]
#[command(author, version, about = "Acquire, release and inspect blockd locks", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/blockd/client.toml")]
    config: PathBuf,

    /// Lock server address (host:port); repeat for a cluster. Overrides config nodes.
    #[arg(short, long = "node")]
    nodes: Vec<String>,

    /// Wire encoding: text or json (overrides config)
    #[arg(long)]
    codec: Option<CodecKind>,

    /// Log level (trace, debug, info, warn, error; overrides config)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a server for some wisdom
    Wisdom,
    /// List locks held on every node
    Show,
    /// Acquire a lock
    Acquire {
        /// Lock identifier
        lock_id: String,
        /// How long the server may queue the request, in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Lock mode: read or write (requires --timeout)
        #[arg(short, long, requires = "timeout")]
        mode: Option<LockMode>,
        /// Keep the lock for this many seconds (or until Ctrl+C), then release it
        #[arg(long)]
        hold: Option<u64>,
    },
    /// Release a lock held by this session
    Release {
        /// Lock identifier
        lock_id: String,
    },
    /// Release every lock held by this session
    ReleaseAll,
    /// Show which node a lock id routes to (no connection is made)
    Route {
        /// Lock identifier
        lock_id: String,
    },
    /// Check configuration file for errors
    CheckConfig {
        /// Path to config file to check (defaults to --config path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::CheckConfig { file } => {
            let path = file.clone().unwrap_or_else(|| cli.config.clone());
            check_config(&path)
        }
        _ => match load_config(&cli) {
            Ok(config) => {
                init_logging(
                    cli.log_level.as_deref().unwrap_or(&config.logging.level),
                    &config.logging.format,
                );
                run(&cli.command, &config).await
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "compact" {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Config file, with command line overrides applied
fn load_config(cli: &Cli) -> Result<BlockdConfig> {
    let mut config = if cli.nodes.is_empty() {
        BlockdConfig::from_file(&cli.config).map_err(|e| {
            Error::Config(format!("{}: {} (or pass --node host:port)", cli.config.display(), e))
        })?
    } else {
        let nodes = cli
            .nodes
            .iter()
            .map(|n| NodeConfig::parse(n))
            .collect::<Result<Vec<_>>>()?;
        BlockdConfig::with_nodes(nodes)
    };

    if let Some(codec) = cli.codec {
        config.client.codec = codec;
    }

    config.validate()?;
    Ok(config)
}

async fn run(command: &Commands, config: &BlockdConfig) -> Result<()> {
    let router = ClusterRouter::from_config(config)?;

    if let Commands::Route { lock_id } = command {
        return route(&router, lock_id);
    }

    router.connect().await?;
    let result = match command {
        Commands::Wisdom => router.wisdom().await.map(|quote| println!("{}", quote)),
        Commands::Show => show(&router).await,
        Commands::Acquire { lock_id, timeout, mode, hold } => {
            acquire(&router, lock_id, *timeout, *mode, *hold).await
        }
        Commands::Release { lock_id } => router
            .release(lock_id)
            .await
            .map(|status| println!("{} {}", status, lock_id)),
        Commands::ReleaseAll => router.release_all().await.map(|released| {
            if released.is_empty() {
                println!("Nothing to release");
            }
            for lock_id in released {
                println!("RELEASED {}", lock_id);
            }
        }),
        Commands::Route { .. } | Commands::CheckConfig { .. } => Ok(()),
    };

    if let Err(e) = router.quit().await {
        tracing::warn!("Disconnect was not clean: {}", e);
    }
    result
}

fn route(router: &ClusterRouter, lock_id: &str) -> Result<()> {
    let node = router.route(lock_id)?;

    println!("Lock:      {}", lock_id);
    println!("Lock hash: {}", blockd::cluster::compute_hash(lock_id));
    println!("Node:      {} (key {})", node.address(), node.hash_key);
    Ok(())
}

async fn show(router: &ClusterRouter) -> Result<()> {
    let locks = router.show().await?;

    println!();
    println!("Held Locks (blockctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    if locks.is_empty() {
        println!("(none)");
    }
    for lock_id in &locks {
        let owner = router
            .route(lock_id)
            .map(|n| n.address())
            .unwrap_or_else(|_| "?".to_string());
        println!("{:<40} {}", lock_id, owner);
    }
    println!();
    Ok(())
}

async fn acquire(
    router: &ClusterRouter,
    lock_id: &str,
    timeout: Option<u64>,
    mode: Option<LockMode>,
    hold: Option<u64>,
) -> Result<()> {
    let status = match (timeout, mode) {
        (Some(ms), Some(mode)) => {
            router
                .acquire_with_mode(lock_id, Duration::from_millis(ms), mode)
                .await?
        }
        (Some(ms), None) => router.acquire_with_timeout(lock_id, Duration::from_millis(ms)).await?,
        (None, _) => router.acquire(lock_id).await?,
    };
    println!("{} {}", status, lock_id);

    if let (Some(secs), true) = (hold, status.is_granted()) {
        println!("Holding {} for {}s (Ctrl+C to release early)", lock_id, secs);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        let released = router.release(lock_id).await?;
        println!("{} {}", released, lock_id);
    }
    Ok(())
}

fn check_config(path: &std::path::Path) -> Result<()> {
    let config = BlockdConfig::from_file(path)?;

    println!("Configuration OK: {}", path.display());
    println!("  Codec: {}", config.client.codec);
    println!("  Nodes:");
    let router = ClusterRouter::from_config(&config)?;
    for node in router.nodes() {
        println!("    {:<30} key {}", node.address(), node.hash_key);
    }
    if router.node_count() != config.nodes.len() {
        println!(
            "  Warning: {} node(s) share a hash key and were replaced",
            config.nodes.len() - router.node_count()
        );
    }
    Ok(())
}
