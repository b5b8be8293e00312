//! # SHANKPIT Probe
//!
//! Simulated game client for exercising a running node by hand.
//!
//! ## Usage
//!
//! ```bash
//! shankpit_probe --count 20 --fps 60
//! shankpit_probe --fps 12 --event          # throttled, then a bonus
//! shankpit_probe --forge                   # every heartbeat signed wrong
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use shankpit_ipc::protocol::{FrameSerializer, GameEvent, Telemetry, SERVER_SIGNATURE_SIZE};
use shankpit_ipc::{NodeClient, DEFAULT_SOCKET_PATH};
use shankpit_security::SessionKey;
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "shankpit_probe", version, about = "Simulated SHANKPIT game client")]
struct Cli {
    /// Control socket path.
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Heartbeats to send.
    #[arg(short, long, default_value_t = 10)]
    count: u64,

    /// Delay between heartbeats, in milliseconds.
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,

    /// Reported minimum FPS.
    #[arg(long, default_value_t = 60)]
    fps: u8,

    /// Send an Event frame after the heartbeats.
    #[arg(long)]
    event: bool,

    /// Sign heartbeats with a wrong key.
    #[arg(long)]
    forge: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "probe failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> std::io::Result<()> {
    let mut client = NodeClient::connect(&cli.socket).await?;
    let nonce = session_nonce();
    client.hello(std::process::id(), 0x5EED_0001, nonce).await?;
    tracing::info!(socket = %cli.socket.display(), nonce, "hello sent");

    let forged_key = SessionKey::from_bytes([0xA5; 32]);
    let mut serializer = FrameSerializer::new();

    for sequence in 1..=cli.count {
        let telemetry = sample(sequence, cli.fps);
        if cli.forge {
            if !serializer.serialize_heartbeat(&telemetry, &forged_key) {
                return Err(std::io::Error::other("heartbeat does not fit the buffer"));
            }
            client.send_raw(serializer.as_slice()).await?;
            client.read_ack().await?;
        } else {
            client.heartbeat(&telemetry).await?;
        }
        tracing::info!(
            sequence,
            entropy = telemetry.input_entropy,
            forged = cli.forge,
            "heartbeat acknowledged"
        );
        tokio::time::sleep(Duration::from_millis(cli.interval_ms)).await;
    }

    if cli.event {
        client
            .event(&GameEvent {
                match_id: nonce,
                kill_timestamp: nonce.wrapping_add(1),
                victim_id: 1,
                weapon_id: 1,
                server_signature: [0; SERVER_SIGNATURE_SIZE],
            })
            .await?;
        tracing::info!("event acknowledged");
    }
    Ok(())
}

/// Telemetry with input entropy that wanders without repeating.
#[allow(clippy::cast_precision_loss)]
fn sample(sequence: u64, fps_min: u8) -> Telemetry {
    let t = sequence as f32;
    Telemetry {
        sequence,
        sample_count: 60,
        frame_time_avg: 1000.0 / f32::from(fps_min.max(1)),
        frame_time_var: 0.4 + 0.1 * (t * 0.37).sin(),
        fps_min,
        input_entropy: 0.75 + 0.2 * (t * 1.3).sin() * (t * 0.21).cos(),
        input_hash: sequence.wrapping_mul(0x9E37_79B9_7F4A_7C15),
        timestamp: sequence * 1000,
    }
}

fn session_nonce() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0x5EED, |d| u64::from(d.subsec_nanos()) ^ d.as_secs().rotate_left(32))
}
