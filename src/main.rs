//! `turretd`: command-line host for the turret controller.
//!
//! ```bash
//! turretd ports
//! turretd send FIRE
//! detector | turretd track
//! turretd --config config/turret.toml config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use turret_control::config::{TrackingConfig, TurretConfig, DEFAULT_CONFIG_PATH};
use turret_control::controller::Controller;
use turret_control::dispatch::DeliveryOutcome;
use turret_control::frame_loop::{run_frame_loop, LineFrameSource, StopSignal};
use turret_control::tracking::TrackingMode;

#[derive(Parser)]
#[command(name = "turretd", version, about = "Face-tracking turret controller")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports, marking the ones discovery would pick
    Ports,
    /// Send one command token to the turret
    Send {
        /// Token written verbatim, e.g. UP or FIRE
        token: String,
    },
    /// Track detections read from stdin, one frame per line
    Track {
        /// Start with automatic tracking off, whatever the configuration says
        #[arg(long)]
        paused: bool,
    },
    /// Print the effective configuration
    Config,
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("turret_control={log_level},turretd={log_level}")));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = TurretConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    init_tracing(&config.application.log_level);

    match cli.command {
        Commands::Ports => list_ports(&config).await,
        Commands::Send { token } => send(&config, &token).await,
        Commands::Track { paused } => track(&config, paused).await,
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn list_ports(config: &TurretConfig) -> Result<()> {
    let controller = Controller::from_config(config);
    let ports = controller
        .list_available_ports()
        .await
        .context("Failed to list serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        let marker = if controller.link().matches_discovery(&port) {
            "*"
        } else {
            " "
        };
        match &port.description {
            Some(description) => println!("{marker} {} ({description})", port.name),
            None => println!("{marker} {}", port.name),
        }
    }
    Ok(())
}

async fn send(config: &TurretConfig, token: &str) -> Result<()> {
    let controller = Controller::from_config(config);
    match controller.issue_direct_command(token).await? {
        DeliveryOutcome::Sent => {
            info!(token, "Command delivered");
            Ok(())
        }
        outcome => anyhow::bail!("Command {token:?} not delivered: {outcome:?}"),
    }
}

/// Tracking mode at startup: the configured one, with `--paused` forcing
/// automatic tracking off.
fn startup_mode(tracking: &TrackingConfig, paused: bool) -> TrackingMode {
    let mut mode = tracking.initial_mode();
    if paused {
        mode.auto_track = false;
    }
    mode
}

async fn track(config: &TurretConfig, paused: bool) -> Result<()> {
    let controller = Controller::from_config(config);
    let mode = startup_mode(&config.tracking, paused);
    if mode != controller.tracking_mode().await {
        controller
            .set_tracking_mode(mode.auto_track, mode.auto_fire)
            .await;
    }
    info!(track = mode.auto_track, "Tracking mode at startup");

    let stop = StopSignal::new();
    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Ctrl-C received, stopping");
        ctrl_c_stop.stop();
    });

    let mut source = LineFrameSource::new(
        BufReader::new(tokio::io::stdin()),
        config.tracking.frame_width,
        config.tracking.frame_height,
    );

    let stats = run_frame_loop(
        &controller,
        &mut source,
        config.tracking.frame_budget,
        &stop,
    )
    .await?;

    controller.link().disconnect().await;
    println!(
        "frames={} detections={} sent={} dropped={}",
        stats.frames, stats.detections, stats.sent, stats.dropped_no_link
    );
    Ok(())
}
