//! X32 Bridge
//!
//! Mirrors a Behringer X32/M32 console over OSC and drives it from surface
//! control bindings.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use x32_bridge::actions::Bindings;
use x32_bridge::bridge::{Bridge, BridgeHandle};
use x32_bridge::config::{AppConfig, ConfigWatcher, DiscoveryConfig};
use x32_bridge::discovery::{self, DeviceRegistry};
use x32_bridge::session::SessionEvent;
use x32_bridge::{cli, monitor};

/// X32 Bridge - OSC bridge for Behringer X32/M32 consoles
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Look for consoles on the local network and exit
    #[arg(long)]
    discover: bool,

    /// Broadcast address used by --discover (overrides discovery.broadcast_addr)
    #[arg(long)]
    broadcast: Option<IpAddr>,

    /// How long --discover waits for replies, in seconds
    #[arg(long, default_value = "2")]
    discover_secs: u64,

    /// Print the console's OSC traffic and exit on Ctrl+C
    #[arg(long)]
    monitor: bool,

    /// Run without touching the network (writes are logged instead)
    #[arg(long)]
    dry_run: bool,

    /// Start an interactive prompt
    #[arg(long)]
    repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting X32 Bridge...");

    if args.discover {
        let settings = discovery_settings(&args.config).await?;
        let broadcast = match args.broadcast {
            Some(addr) => addr,
            None => settings.broadcast()?,
        };
        let mut registry = DeviceRegistry::new(settings.device_ttl());
        let devices = discovery::discover(
            &mut registry,
            broadcast,
            Duration::from_secs(args.discover_secs),
        )
        .await?;
        monitor::print_devices(&devices);
        return Ok(());
    }

    info!("Configuration file: {}", args.config);

    if args.monitor {
        let config = AppConfig::load(&args.config).await?;
        monitor::run_monitor(
            &config.console.host,
            config.console.port,
            Duration::from_millis(config.connection.xremote_interval_ms),
        )
        .await?;
        return Ok(());
    }

    // Load configuration with hot-reload watcher
    let (config_watcher, initial_config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let bindings = Bindings::from_config(&initial_config.controls)
        .context("Invalid control bindings")?;
    info!("{} control bindings loaded", bindings.len());
    let bindings = Arc::new(RwLock::new(bindings));

    let (bridge, events) = Bridge::spawn((*initial_config).clone(), args.dry_run);
    if args.dry_run {
        info!("🧪 Dry run: console writes are logged, not sent");
    }

    let repl_task = args
        .repl
        .then(|| tokio::spawn(cli::run_repl(bridge.clone(), bindings.clone())));

    run_app(
        bridge,
        bindings,
        events,
        config_watcher,
        shutdown_signal(repl_task),
    )
    .await?;

    info!("X32 Bridge shutdown complete");
    Ok(())
}

async fn run_app(
    bridge: BridgeHandle,
    bindings: Arc<RwLock<Bindings>>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut config_watcher: ConfigWatcher,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    info!("Starting main application loop...");

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = events.recv() => log_event(&event),

            // Handle config reload
            Some(new_config) = config_watcher.next_config() => {
                info!("📝 Configuration file changed, reloading...");

                match Bindings::from_config(&new_config.controls) {
                    Ok(new_bindings) => {
                        *bindings.write() = new_bindings;
                        bridge.reload(new_config);
                        info!("✅ Configuration reloaded, session rebuilt");
                    }
                    Err(e) => {
                        warn!("⚠️  Failed to reload config (keeping old config): {}", e);
                    }
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    bridge.shutdown();

    // Let the bridge flush pending invalidations before the runtime goes away
    while let Some(event) = events.recv().await {
        log_event(&event);
    }

    Ok(())
}

/// Discovery works without a config file; one that exists must be valid
async fn discovery_settings(path: &str) -> Result<DiscoveryConfig> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        Ok(AppConfig::load(path).await?.discovery)
    } else {
        debug!("No config at {}, using discovery defaults", path);
        Ok(DiscoveryConfig::default())
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::FeedbacksInvalidated(kinds) => {
            debug!(?kinds, "Feedbacks need re-evaluation");
        }
        SessionEvent::DefinitionsStale => {
            info!("🏷️  Console names changed, definitions need regenerating");
        }
        SessionEvent::ValueChanged { address, args } => {
            debug!(address = %address, args = ?args, "Value changed");
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

/// Resolves on Ctrl+C, or when the REPL exits
async fn shutdown_signal(repl: Option<tokio::task::JoinHandle<Result<()>>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let repl_exit = async {
        match repl {
            Some(task) => {
                if let Ok(Err(e)) = task.await {
                    warn!("REPL failed: {}", e);
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = repl_exit => {}
    }
    info!("Shutdown signal received");
}
