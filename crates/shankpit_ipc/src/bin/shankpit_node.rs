//! # SHANKPIT Node
//!
//! Serves the game-client control socket and forwards intensity commands to
//! the resource controller.
//!
//! ## Usage
//!
//! ```bash
//! shankpit_node --config config/node.toml --log-level debug
//! shankpit_node --socket /run/shankpit/node.sock
//! ```
//!
//! `RUST_LOG` takes precedence over `--log-level`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use crossbeam_channel::Receiver;
use shankpit_ipc::{ChannelController, ControlCommand, NodeConfig, NodeResult, NodeServer};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "shankpit_node", version, about = "SHANKPIT node control socket")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control socket path, overriding the config.
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "node stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> NodeResult<()> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(socket) = cli.socket {
        config = config.with_socket_path(socket);
    }

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         SHANKPIT NODE                                            ║");
    println!("║         GAME-CLIENT CONTROL SOCKET                               ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Socket:             {}", config.socket_path.display());
    println!("│ Idle Timeout:       {} ms", config.idle_timeout_ms);
    println!("│ Max Frame:          {} bytes", config.max_frame_len);
    println!("│ Auth Escalation:    {}", escalation_label(config.max_auth_failures));
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let (controller, commands) = ChannelController::new(config.command_buffer);
    let resource = std::thread::Builder::new()
        .name("resource-controller".into())
        .spawn(move || drive_resource(&commands))?;

    let server = NodeServer::bind(config, controller)?;
    let stats = server.stats();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("interrupt received, shutting down"),
            Err(err) => tracing::error!(%err, "cannot listen for interrupt"),
        }
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;

    if resource.join().is_err() {
        tracing::error!("resource controller thread panicked");
    }

    let final_stats = stats.snapshot();
    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    NODE SHUTDOWN                                 ║");
    println!("╠══════════════════════════════════════════════════════════════════╣");
    println!("║ Connections:        {:>10}", final_stats.connections);
    println!("║ Sessions:           {:>10}", final_stats.handshakes_accepted);
    println!("║ Rejected Hellos:    {:>10}", final_stats.handshakes_rejected);
    println!("║ Frames:             {:>10}", final_stats.frames_received);
    println!("║ Auth Failures:      {:>10}", final_stats.auth_failures);
    println!("║ Replays:            {:>10}", final_stats.replays_rejected);
    println!("║ Anomalies:          {:>10}", final_stats.anomalies_flagged);
    println!("║ Bonuses:            {:>10}", final_stats.bonuses_applied);
    println!("║ Kill Switches:      {:>10}", final_stats.kill_switches);
    println!("╚══════════════════════════════════════════════════════════════════╝");
    Ok(())
}

/// Stand-in for the resource side: records the commanded state.
///
/// Returns once the server, and with it the last sender, is gone.
fn drive_resource(commands: &Receiver<ControlCommand>) {
    let mut intensity = 0.0_f32;
    for command in commands {
        match command {
            ControlCommand::SetIntensity(level) => {
                intensity = level;
                tracing::info!(intensity, "intensity set");
            }
            ControlCommand::ApplyBonus(multiplier) => {
                tracing::info!(intensity, multiplier, "bonus applied");
            }
        }
    }
    tracing::debug!(intensity, "command channel closed");
}

fn escalation_label(limit: u32) -> String {
    if limit == 0 {
        "off".to_string()
    } else {
        format!("disconnect after {limit} forged frames")
    }
}
