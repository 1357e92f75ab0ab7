use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use plejd_gateway::config::GatewayConfig;
use plejd_gateway::core::bluetooth::{BluestAdapter, ManagerSettings, PlejdManager};
use plejd_gateway::core::{GatewayEvent, LightControl, MeshSceneExecutor, TurnOnOptions};
use plejd_gateway::logging;

/// Delay before retrying after no Plejd session could be bound
const CONNECT_FAILED_RETRY: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(version, about = "Gateway between a Plejd BLE lighting mesh and home automation")]
struct Args {
    /// Path to the JSON gateway configuration
    #[arg(short, long, default_value = "plejd.json")]
    config: PathBuf,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load_config(&args.config).await?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    logging::init(&config.logging).context("Failed to install logger")?;

    let registry = config.registry();
    if registry.is_empty() {
        warn!("No devices configured, only scenes can be triggered");
    } else {
        info!("Managing {} Plejd device(s)", registry.len());
    }

    let adapter = Arc::new(BluestAdapter::new().await);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let manager = PlejdManager::new(
        adapter,
        config.crypto_key()?,
        registry,
        Arc::new(MeshSceneExecutor),
        ManagerSettings::from(&config),
        events_tx,
    );

    let event_manager = manager.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if event == GatewayEvent::ConnectFailed {
                warn!(
                    "Were unable to connect, will retry connection in {:?}.",
                    CONNECT_FAILED_RETRY
                );
                let _ = event_manager.throttled_init(CONNECT_FAILED_RETRY);
            }
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to serialize event: {}", e),
            }
        }
    });

    if let Err(e) = manager.init().await {
        error!("Plejd initialization failed: {}", e);
    }

    let command_manager = manager.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Err(e) = run_command(&command_manager, &line).await {
                warn!("Command {:?} failed: {}", line, e);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    manager.disconnect().await;
    Ok(())
}

/// Handles one stdin command: `on <id> [brightness] [transition]`,
/// `off <id> [transition]` or `scene <id>`.
async fn run_command(manager: &PlejdManager, line: &str) -> Result<()> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["on", id, rest @ ..] => {
            let options = TurnOnOptions {
                brightness: rest.first().map(|b| b.parse()).transpose()?,
                transition: rest.get(1).map(|t| t.parse()).transpose()?.unwrap_or(0.0),
            };
            manager.turn_on(id.parse()?, options)?;
        }
        ["off", id, rest @ ..] => {
            let transition = rest.first().map(|t| t.parse()).transpose()?.unwrap_or(0.0);
            manager.turn_off(id.parse()?, transition)?;
        }
        ["scene", id] => manager.trigger_scene(id.parse()?).await?,
        [] => {}
        _ => anyhow::bail!("unknown command"),
    }
    Ok(())
}
