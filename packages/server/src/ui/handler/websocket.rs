//! WebSocket connection handlers.

use std::{net::SocketAddr, str::FromStr, sync::Arc};

use axum::{
    extract::{
        ConnectInfo, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::USER_AGENT},
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    domain::{ClientId, ClientMetadata, ClientRole},
    infrastructure::dto::websocket::ClientMessage,
    ui::state::AppState,
    usecase::{RegisterError, Registration},
};

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    /// `player` (default), `admin` or `singer`
    pub role: Option<String>,
    /// Stable device id; generated when absent
    pub device_id: Option<String>,
    pub name: Option<String>,
    /// Comma separated
    pub capabilities: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let role = match query.role.as_deref() {
        None => ClientRole::Player,
        Some(role) => ClientRole::from_str(role).map_err(|e| {
            tracing::warn!("Rejecting connection from {}: {}", peer, e);
            StatusCode::BAD_REQUEST
        })?,
    };

    let client_id = match query.device_id {
        None => None,
        Some(device_id) => Some(ClientId::try_from(device_id.clone()).map_err(|e| {
            tracing::warn!("Invalid deviceId '{}': {}", device_id, e);
            StatusCode::BAD_REQUEST
        })?),
    };

    if let Some(client_id) = &client_id
        && state.engine.is_connected(client_id).await
    {
        tracing::warn!(
            "Device '{}' is already connected. Rejecting connection.",
            client_id
        );
        return Err(StatusCode::CONFLICT);
    }

    let metadata = ClientMetadata {
        ip_address: Some(peer.ip().to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        capabilities: query
            .capabilities
            .as_deref()
            .map(parse_capabilities)
            .unwrap_or_default(),
        requested_name: query.name,
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, role, metadata)))
}

fn parse_capabilities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|capability| !capability.is_empty())
        .map(str::to_string)
        .collect()
}

/// Spawns a task that forwards queued outbound messages to the WebSocket sender.
///
/// The loop ends when the channel closes (the client was unregistered) or a
/// write fails.
fn pusher_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    client_id: Option<ClientId>,
    role: ClientRole,
    metadata: ClientMetadata,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let registration = Registration {
        client_id,
        role,
        metadata,
        sender: tx,
    };

    let client = match state.engine.connect(registration).await {
        Ok(client) => client,
        Err(RegisterError::DuplicateClientId(id)) => {
            // Lost a race with another connection using the same id
            tracing::warn!("Device '{}' connected twice; closing the newer socket", id);
            return;
        }
    };
    tracing::info!("Device '{}' connected ({})", client.id, client.role);

    let (sender, mut receiver) = socket.split();
    let mut send_task = pusher_loop(rx, sender);

    let engine = state.engine.clone();
    let client_id = client.id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!("WebSocket error from '{}': {}", client_id, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => {
                    tracing::debug!("Received from '{}': {}", client_id, text.as_str());
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(message) => engine.handle_message(&client_id, message).await,
                        Err(e) => {
                            tracing::warn!("Dropping malformed message from '{}': {}", client_id, e);
                            engine.record_activity(&client_id).await;
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::info!("Device '{}' requested close", client_id);
                    break;
                }
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {
                    engine.record_activity(&client_id).await;
                }
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    state.engine.disconnect(&client.id, client.connected_at).await;
    tracing::info!("Device '{}' disconnected", client.id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capabilities() {
        // テスト項目: カンマ区切りの capability が空要素を除いて分解される
        assert_eq!(
            parse_capabilities("video, audio,,subtitles "),
            vec!["video", "audio", "subtitles"]
        );
        assert!(parse_capabilities("").is_empty());
    }
}
