//! Integration tests: the server runs in-process on an ephemeral port and is
//! driven by WebSocket players (tokio-tungstenite) and HTTP calls (reqwest).

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{net::TcpStream, sync::oneshot};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};

use lockstep_server::{
    config::SyncConfig,
    infrastructure::{
        media::DirectUrlResolver, message_pusher::WebSocketMessagePusher,
        repository::InMemoryClientRepository,
    },
    ui::Server,
    usecase::SyncEngine,
};
use lockstep_shared::time::{SystemClock, now_millis};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Helper struct to manage an in-process server
struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        // Short buffers keep the tests fast
        let config = SyncConfig {
            preload_buffer_ms: 600,
            latency_margin_ms: 100,
            readiness_margin_ms: 300,
            ..SyncConfig::default()
        };
        let engine = Arc::new(SyncEngine::new(
            config,
            Arc::new(InMemoryClientRepository::new()),
            Arc::new(WebSocketMessagePusher::new()),
            Arc::new(DirectUrlResolver),
            Arc::new(SystemClock),
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("No local address");
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = Server::new(engine);
        tokio::spawn(async move {
            let _ = server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        TestServer {
            addr,
            shutdown: Some(shutdown),
        }
    }

    fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = reqwest::Client::new()
            .post(self.http_url(path))
            .json(&body)
            .send()
            .await
            .expect("Request failed");
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let response = reqwest::get(self.http_url(path))
            .await
            .expect("Request failed");
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Helper struct for a scripted WebSocket player
struct TestPlayer {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    device_id: String,
}

impl TestPlayer {
    async fn connect(server: &TestServer, device_id: &str) -> Self {
        let url = server.ws_url(&format!("role=player&deviceId={}", device_id));
        let (ws, _) = connect_async(url).await.expect("Failed to connect");
        let mut player = TestPlayer {
            ws,
            device_id: device_id.to_string(),
        };
        let registered = player.expect("device_registered").await;
        assert_eq!(registered["deviceId"], device_id);
        player
    }

    async fn next_message(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("Timed out waiting for a message")
                .expect("Connection closed")
                .expect("WebSocket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("Invalid JSON");
            }
        }
    }

    /// Read messages until one of type `kind` arrives, answering clock probes on the way
    async fn expect(&mut self, kind: &str) -> Value {
        loop {
            let message = self.next_message().await;
            if message["type"] == kind {
                return message;
            }
            if message["type"] == "clock_sync_ping" {
                self.answer_ping(&message).await;
            }
        }
    }

    async fn answer_ping(&mut self, ping: &Value) {
        let now = now_millis();
        self.send(json!({
            "type": "clock_sync_response",
            "pingId": ping["pingId"],
            "serverTime": ping["serverTime"],
            "clientTime": now,
            "responseTime": now,
        }))
        .await;
    }

    async fn send(&mut self, message: Value) {
        self.ws
            .send(Message::Text(message.to_string().into()))
            .await
            .expect("Failed to send");
    }
}

#[tokio::test]
async fn test_health_check() {
    // テスト項目: ヘルスチェックが 200 を返す
    let server = TestServer::start().await;

    let (status, body) = server.get("/api/health").await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_player_registers_and_syncs_clock() {
    // テスト項目: 接続したプレイヤーが登録され、ping への応答で時刻同期済みになる
    // given (前提条件):
    let server = TestServer::start().await;
    let mut player = TestPlayer::connect(&server, "tv-living").await;

    // when (操作):
    let ping = player.expect("clock_sync_ping").await;
    player.answer_ping(&ping).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // then (期待する結果):
    let (status, client) = server.get("/api/clients/tv-living").await;
    assert_eq!(status, 200);
    assert_eq!(client["role"], "player");
    assert_eq!(client["status"], "online");
    assert_eq!(client["clockSynced"], true);
    assert_eq!(client["ipAddress"], "127.0.0.1");

    let (_, clients) = server.get("/api/clients").await;
    assert_eq!(clients.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_duplicate_device_id_is_rejected() {
    // テスト項目: オンラインの deviceId での接続は 409 で拒否される
    // given (前提条件):
    let server = TestServer::start().await;
    let _player = TestPlayer::connect(&server, "tv-1").await;

    // when (操作):
    let result = connect_async(server.ws_url("role=player&deviceId=tv-1")).await;

    // then (期待する結果):
    match result {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 409),
        other => panic!("expected HTTP 409, got {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test]
async fn test_unknown_role_is_rejected() {
    // テスト項目: 未知のロールでの接続は 400
    let server = TestServer::start().await;

    let result = connect_async(server.ws_url("role=projector")).await;

    assert!(matches!(
        result,
        Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 400
    ));
}

#[tokio::test]
async fn test_coordinated_play_reaches_every_player() {
    // テスト項目: play で全プレイヤーに preload → play が届き、再生状態になる
    // given (前提条件):
    let server = Arc::new(TestServer::start().await);
    let mut a = TestPlayer::connect(&server, "tv-a").await;
    let mut b = TestPlayer::connect(&server, "tv-b").await;

    // when (操作):
    let request = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .post(
                    "/api/playback/play",
                    json!({"videoUrl": "http://media.local/movie.mp4", "videoTime": 5.0}),
                )
                .await
        })
    };
    for player in [&mut a, &mut b] {
        let preload = player.expect("sync_preload").await;
        assert_eq!(preload["videoUrl"], "http://media.local/movie.mp4");
        player
            .send(json!({
                "type": "sync_ready",
                "commandId": preload["commandId"],
                "bufferLevel": 1.0,
            }))
            .await;
    }
    let (status, response) = request.await.expect("Request task panicked");

    // then (期待する結果):
    assert_eq!(status, 200);
    assert_eq!(response["outcome"], "dispatched");
    assert_eq!(response["kind"], "play");
    assert_eq!(response["ready"], 2);

    for player in [&mut a, &mut b] {
        let play = player.expect("sync_play").await;
        assert_eq!(play["videoTime"], 5.0);
        assert_eq!(play["tolerance"], 100);
        assert_eq!(play["commandId"], response["commandId"]);
        assert!(play["scheduledTime"].as_i64().is_some());
        assert!(!player.device_id.is_empty());
    }

    let (_, playback) = server.get("/api/playback").await;
    assert_eq!(playback["phase"], "playing");
    assert_eq!(playback["isPlaying"], true);
    assert_eq!(
        playback["currentVideo"]["url"],
        "http://media.local/movie.mp4"
    );

    // 一時停止も全員に届く
    let (status, pause) = server.post("/api/playback/pause", json!({})).await;
    assert_eq!(status, 200);
    for player in [&mut a, &mut b] {
        let message = player.expect("sync_pause").await;
        assert_eq!(message["commandId"], pause["commandId"]);
    }
}

#[tokio::test]
async fn test_pause_without_video_is_unprocessable() {
    // テスト項目: 何も再生していない状態の pause / 再開は 422
    let server = TestServer::start().await;

    let (pause_status, body) = server.post("/api/playback/pause", json!({})).await;
    let (resume_status, _) = server.post("/api/playback/play", json!({})).await;

    assert_eq!(pause_status, 422);
    assert!(body["error"].as_str().is_some());
    assert_eq!(resume_status, 422);
}

#[tokio::test]
async fn test_disconnected_player_goes_offline() {
    // テスト項目: 接続を閉じたプレイヤーはオフラインとして残る
    // given (前提条件):
    let server = TestServer::start().await;
    let mut player = TestPlayer::connect(&server, "tv-gone").await;

    // when (操作):
    player.ws.close(None).await.expect("Failed to close");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // then (期待する結果):
    let (_, client) = server.get("/api/clients/tv-gone").await;
    assert_eq!(client["status"], "offline");
    assert!(client["disconnectedAt"].as_str().is_some());

    let (status, _) = server.get("/api/clients/nobody").await;
    assert_eq!(status, 404);
}
