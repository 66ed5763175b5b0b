//! Server execution logic.

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::usecase::SyncEngine;

use super::{
    handler::{
        debug_sync_state, get_client, get_playback, health_check, list_clients, pause, play,
        seek, stop, websocket_handler,
    },
    signal::shutdown_signal,
    state::AppState,
};

/// Build the application router around `engine`
pub fn router(engine: Arc<SyncEngine>) -> Router {
    let app_state = Arc::new(AppState { engine });

    Router::new()
        // WebSocket エンドポイント
        .route("/ws", get(websocket_handler))
        // 再生制御
        .route("/api/playback", get(get_playback))
        .route("/api/playback/play", post(play))
        .route("/api/playback/pause", post(pause))
        .route("/api/playback/seek", post(seek))
        .route("/api/playback/stop", post(stop))
        // 状態参照
        .route("/api/clients", get(list_clients))
        .route("/api/clients/{client_id}", get(get_client))
        .route("/api/health", get(health_check))
        .route("/debug/sync", get(debug_sync_state))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Playback synchronization server
///
/// # Example
///
/// ```ignore
/// let server = Server::new(engine);
/// server.run("127.0.0.1".to_string(), 8080).await?;
/// ```
pub struct Server {
    engine: Arc<SyncEngine>,
}

impl Server {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Bind to `host:port` and serve until Ctrl+C / SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the specified address or
    /// if there's an error during server execution.
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&bind_addr).await?;

        tracing::info!("Sync server listening on {}", listener.local_addr()?);
        tracing::info!("Players connect to: ws://{}/ws?role=player", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.engine.start().await;

        let app = router(self.engine.clone());
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        self.engine.shutdown().await;
        result?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}
