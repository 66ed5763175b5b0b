//! Lockstep playback synchronization server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin lockstep-server
//! cargo run --bin lockstep-server -- --host 0.0.0.0 --port 3000 --auto-realign
//! ```

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;

use lockstep_server::{
    config::SyncConfig,
    domain::EngineEvent,
    infrastructure::{
        media::DirectUrlResolver, message_pusher::WebSocketMessagePusher,
        repository::InMemoryClientRepository,
    },
    ui::Server,
    usecase::SyncEngine,
};
use lockstep_shared::{logger::setup_logger, time::SystemClock};

#[derive(Parser, Debug)]
#[command(name = "lockstep-server")]
#[command(about = "Playback synchronization server for independently-clocked players", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "LOCKSTEP_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "LOCKSTEP_PORT", default_value = "8080")]
    port: u16,

    /// Default log level when RUST_LOG is not set
    #[arg(long, env = "LOCKSTEP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Maximum acceptable cross-player timing difference (ms)
    #[arg(long, env = "LOCKSTEP_TOLERANCE_MS", default_value_t = 100)]
    tolerance_ms: u64,

    /// Minimum delay between a play/seek request and its execution (ms)
    #[arg(long, env = "LOCKSTEP_PRELOAD_BUFFER_MS", default_value_t = 2_000)]
    preload_buffer_ms: u64,

    /// Coordination buffer grows as MULTIPLIER * average latency + MARGIN
    #[arg(long, env = "LOCKSTEP_LATENCY_MULTIPLIER", default_value_t = 3.0)]
    latency_multiplier: f64,

    #[arg(long, env = "LOCKSTEP_LATENCY_MARGIN_MS", default_value_t = 500)]
    latency_margin_ms: u64,

    /// Delay between a pause request and its execution (ms)
    #[arg(long, env = "LOCKSTEP_PAUSE_BUFFER_MS", default_value_t = 200)]
    pause_buffer_ms: u64,

    /// Readiness wait ends this long before the scheduled instant (ms)
    #[arg(long, env = "LOCKSTEP_READINESS_MARGIN_MS", default_value_t = 500)]
    readiness_margin_ms: u64,

    #[arg(long, env = "LOCKSTEP_CLOCK_SYNC_INTERVAL_SECS", default_value_t = 30)]
    clock_sync_interval_secs: u64,

    #[arg(long, env = "LOCKSTEP_HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    heartbeat_interval_secs: u64,

    /// Clients silent for longer than this are marked offline
    #[arg(long, env = "LOCKSTEP_ACTIVITY_TIMEOUT_SECS", default_value_t = 60)]
    activity_timeout_secs: u64,

    /// Offline clients are forgotten after this long
    #[arg(long, env = "LOCKSTEP_PURGE_GRACE_SECS", default_value_t = 300)]
    purge_grace_secs: u64,

    #[arg(long, env = "LOCKSTEP_DRIFT_CHECK_INTERVAL_SECS", default_value_t = 5)]
    drift_check_interval_secs: u64,

    /// Re-seek players to the server timeline when drift exceeds the threshold
    #[arg(long, env = "LOCKSTEP_AUTO_REALIGN")]
    auto_realign: bool,

    #[arg(long, env = "LOCKSTEP_REALIGN_THRESHOLD_MS", default_value_t = 500)]
    realign_threshold_ms: u64,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            tolerance_ms: self.tolerance_ms,
            preload_buffer_ms: self.preload_buffer_ms,
            latency_multiplier: self.latency_multiplier,
            latency_margin_ms: self.latency_margin_ms,
            pause_buffer_ms: self.pause_buffer_ms,
            readiness_margin_ms: self.readiness_margin_ms,
            clock_sync_interval: Duration::from_secs(self.clock_sync_interval_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            activity_timeout: Duration::from_secs(self.activity_timeout_secs),
            purge_grace: Duration::from_secs(self.purge_grace_secs),
            drift_check_interval: Duration::from_secs(self.drift_check_interval_secs),
            auto_realign: self.auto_realign,
            realign_threshold_ms: self.realign_threshold_ms,
        }
    }
}

/// Log every engine event (stands in for an admin surface)
fn spawn_event_logger(engine: &SyncEngine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::DriftReport {
                    check_id,
                    assessment,
                }) => {
                    tracing::info!(
                        "[event] drift {}: skew={}ms worst={:?}ms within_tolerance={}",
                        check_id,
                        assessment.max_skew_ms,
                        assessment.worst_deviation_ms(),
                        assessment.within_tolerance
                    );
                }
                Ok(event) => tracing::info!("[event] {:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[event] logger lagged; {} event(s) skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &args.log_level);

    // Initialize dependencies in order:
    // 1. Repository
    // 2. MessagePusher / MediaResolver
    // 3. SyncEngine
    // 4. Server
    let config = args.sync_config();
    tracing::debug!("Sync config: {:?}", config);

    // 1. Create Repository (in-memory)
    let repository = Arc::new(InMemoryClientRepository::new());

    // 2. Create MessagePusher (WebSocket implementation) and MediaResolver
    let message_pusher = Arc::new(WebSocketMessagePusher::new());
    let media = Arc::new(DirectUrlResolver);

    // 3. Create the engine
    let engine = Arc::new(SyncEngine::new(
        config,
        repository,
        message_pusher,
        media,
        Arc::new(SystemClock),
    ));
    spawn_event_logger(&engine);

    // 4. Create and run the server
    let server = Server::new(engine);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
