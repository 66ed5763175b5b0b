//! WebSocket session with the synchronization server.

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, http::StatusCode, protocol::Message},
};

use lockstep_server::infrastructure::dto::websocket::{
    ClientMessage, ServerMessage, TransitionPayload,
};
use lockstep_shared::time::Clock;

use crate::{
    clock::SkewedClock,
    error::PlayerError,
    playback::{PlaybackModel, Transition},
};

/// Connection settings of one simulated display
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080/ws`
    pub url: String,
    pub role: String,
    pub device_id: Option<String>,
    pub name: Option<String>,
    /// Offset added to the system clock to simulate an unsynchronized device
    pub clock_skew_ms: i64,
    /// Simulated buffering time before answering a preload
    pub preload_ms: u64,
    /// Media length reported with readiness, if known
    pub video_duration: Option<f64>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            role: "player".to_string(),
            device_id: None,
            name: None,
            clock_skew_ms: 0,
            preload_ms: 300,
            video_duration: None,
        }
    }
}

/// Build the connect URL with registration query parameters
pub fn connect_url(options: &PlayerOptions, device_id: Option<&str>) -> String {
    let mut params = vec![format!("role={}", encode_component(&options.role))];
    if let Some(id) = device_id {
        params.push(format!("deviceId={}", encode_component(id)));
    }
    if let Some(name) = &options.name {
        params.push(format!("name={}", encode_component(name)));
    }
    params.push("capabilities=video".to_string());
    format!("{}?{}", options.url, params.join("&"))
}

fn encode_component(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

/// Run one connection until it drops.
///
/// `device_id` is updated with the id the server assigned so that a
/// reconnect re-registers under the same identity. The playback model
/// outlives the session, like a display that keeps playing while offline.
pub async fn run_player_session(
    options: &PlayerOptions,
    device_id: &mut Option<String>,
    model: Arc<Mutex<PlaybackModel>>,
) -> Result<(), PlayerError> {
    let url = connect_url(options, device_id.as_deref());
    let label = device_id.clone().unwrap_or_else(|| "<new>".to_string());

    let (ws_stream, _response) = match connect_async(url.as_str()).await {
        Ok(result) => result,
        Err(WsError::Http(response)) if response.status() == StatusCode::CONFLICT => {
            return Err(PlayerError::DuplicateDeviceId(label));
        }
        Err(e) => return Err(PlayerError::Connection(e.to_string())),
    };

    tracing::info!("Connected to {}", options.url);

    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();

    let mut write_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode {:?}: {}", message, e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text.into())).await {
                tracing::warn!("WebSocket write error: {}", e);
                break;
            }
        }
    });

    let mut session = Session::new(options, model, outbound_tx);
    let mut assigned: Option<String> = None;

    let result = loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::DeviceRegistered { device_id, assigned_name, .. }) => {
                            tracing::info!("Registered as '{}' ({})", assigned_name, device_id);
                            assigned = Some(device_id);
                        }
                        Ok(message) => session.handle(message).await,
                        Err(e) => tracing::warn!("Ignoring undecodable message: {} ({})", e, text),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("Server closed the connection");
                    break Err(PlayerError::Closed);
                }
                Some(Err(e)) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    break Err(PlayerError::Connection(e.to_string()));
                }
                Some(Ok(_)) => {}
            },
            _ = &mut write_task => {
                break Err(PlayerError::Connection("writer stopped".to_string()));
            }
        }
    };

    write_task.abort();
    session.abort_preloads();
    if assigned.is_some() {
        *device_id = assigned;
    }
    result
}

/// Reacts to server messages for one connection
pub struct Session {
    clock: SkewedClock,
    preload_ms: u64,
    video_duration: Option<f64>,
    model: Arc<Mutex<PlaybackModel>>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    pending_transition: Option<JoinHandle<()>>,
    preloads: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        options: &PlayerOptions,
        model: Arc<Mutex<PlaybackModel>>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> Self {
        Self {
            clock: SkewedClock::new(options.clock_skew_ms),
            preload_ms: options.preload_ms,
            video_duration: options.video_duration,
            model,
            outbound,
            pending_transition: None,
            preloads: Vec::new(),
        }
    }

    pub async fn handle(&mut self, message: ServerMessage) {
        tracing::debug!("<- {:?}", message);
        match message {
            ServerMessage::DeviceRegistered { .. } => {}
            ServerMessage::ClockSyncPing {
                server_time,
                ping_id,
            } => {
                let now = self.clock.now_millis();
                self.reply(ClientMessage::ClockSyncResponse {
                    ping_id,
                    server_time,
                    client_time: now,
                    response_time: Some(now),
                });
            }
            ServerMessage::SyncPreload {
                video_url,
                command_id,
            } => {
                self.model.lock().await.preload(&video_url);
                self.preloads.retain(|task| !task.is_finished());
                let outbound = self.outbound.clone();
                let delay = Duration::from_millis(self.preload_ms);
                let video_duration = self.video_duration;
                self.preloads.push(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    tracing::info!("Buffered {} for {}", video_url, command_id);
                    let _ = outbound.send(ClientMessage::SyncReady {
                        command_id,
                        buffer_level: 1.0,
                        video_duration,
                    });
                }));
            }
            ServerMessage::SyncPlay(payload) => self.schedule(Transition::Play, payload),
            ServerMessage::SyncPause(payload) => self.schedule(Transition::Pause, payload),
            ServerMessage::SyncSeek(payload) => self.schedule(Transition::Seek, payload),
            ServerMessage::SyncCheckPosition { check_id } => {
                let now = self.clock.now_millis();
                let model = self.model.lock().await;
                let message = ClientMessage::PositionReport {
                    check_id,
                    position: model.position_at(now),
                    client_time: Some(now),
                    video_url: model.url().map(str::to_string),
                    duration: model.duration(),
                };
                drop(model);
                self.reply(message);
            }
            ServerMessage::Heartbeat { .. } => {
                self.reply(ClientMessage::HeartbeatResponse {
                    client_time: Some(self.clock.now_millis()),
                });
            }
        }
    }

    /// Fire `transition` at its scheduled local instant.
    ///
    /// A newer transition replaces one that has not fired yet.
    fn schedule(&mut self, transition: Transition, payload: TransitionPayload) {
        if let Some(previous) = self.pending_transition.take()
            && !previous.is_finished()
        {
            tracing::info!("Replacing unfired transition with {}", payload.command_id);
            previous.abort();
        }

        let clock = self.clock;
        let delay_ms = payload.scheduled_time - clock.now_millis();
        let model = self.model.clone();
        let outbound = self.outbound.clone();
        let video_duration = self.video_duration;

        self.pending_transition = Some(tokio::spawn(async move {
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }
            let fired_at = clock.now_millis();
            let late_ms = fired_at - payload.scheduled_time;
            if late_ms > payload.tolerance as i64 {
                tracing::warn!(
                    "{:?} {} fired {} ms late (tolerance {} ms)",
                    transition,
                    payload.command_id,
                    late_ms,
                    payload.tolerance
                );
            }

            let mut model = model.lock().await;
            let previous_url = model.url().map(str::to_string);
            // Anchor at the scheduled instant so lateness is absorbed into the position
            model.apply(transition, &payload, payload.scheduled_time);
            if model.url() != previous_url.as_deref() {
                model.set_duration(video_duration);
            }
            let status = model.status(fired_at);
            drop(model);

            tracing::info!(
                "{:?} {} at {:.3}s",
                transition,
                payload.command_id,
                status.position
            );
            let _ = outbound.send(ClientMessage::StatusUpdate {
                buffer_level: Some(1.0),
                current_video: Some(status),
            });
        }));
    }

    fn reply(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("Outbound channel closed, dropping reply");
        }
    }

    fn abort_preloads(&mut self) {
        for task in self.preloads.drain(..) {
            task.abort();
        }
    }
}
