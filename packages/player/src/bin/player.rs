//! Headless Lockstep player.
//!
//! Registers with a Lockstep server and follows its coordinated playback
//! commands against a simulated local clock and playback model.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin lockstep-player -- --device-id tv-1 --name "Lobby TV"
//! cargo run --bin lockstep-player -- --device-id tv-2 --clock-skew-ms 1500
//! ```

use clap::Parser;

use lockstep_player::{PlayerOptions, run_player};
use lockstep_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "lockstep-player")]
#[command(about = "Headless player for the Lockstep playback synchronization server", long_about = None)]
struct Args {
    /// WebSocket server URL
    #[arg(short = 'u', long, env = "LOCKSTEP_URL", default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Client role (player, admin or singer)
    #[arg(short = 'r', long, default_value = "player")]
    role: String,

    /// Stable device id (must be unique); the server assigns one if omitted
    #[arg(short = 'd', long, env = "LOCKSTEP_DEVICE_ID")]
    device_id: Option<String>,

    /// Display name
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Offset applied to the local clock in milliseconds
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    clock_skew_ms: i64,

    /// Simulated buffering time before reporting ready
    #[arg(long, default_value_t = 300)]
    preload_ms: u64,

    /// Media length in seconds reported with readiness
    #[arg(long)]
    video_duration: Option<f64>,

    /// Default log level
    #[arg(long, env = "LOCKSTEP_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    let options = PlayerOptions {
        url: args.url,
        role: args.role,
        device_id: args.device_id,
        name: args.name,
        clock_skew_ms: args.clock_skew_ms,
        preload_ms: args.preload_ms,
        video_duration: args.video_duration,
    };

    tokio::select! {
        result = run_player(options) => {
            if let Err(e) = result {
                tracing::error!("Player error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }
}
