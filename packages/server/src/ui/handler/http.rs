//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use lockstep_shared::time::timestamp_to_rfc3339;

use crate::{
    domain::ClientId,
    infrastructure::dto::{
        conversion::command_kind_name,
        http::{
            ClientDto, PlayRequestDto, PlaybackStatusDto, SeekRequestDto, TransitionResponseDto,
        },
    },
    ui::state::AppState,
    usecase::{PlayRequest, PlaybackError, TransitionOutcome, TransitionReport},
};

/// Error response: `{"error": "..."}` with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

impl From<PlaybackError> for ApiError {
    fn from(error: PlaybackError) -> Self {
        let status = match error {
            PlaybackError::NothingToResume => StatusCode::UNPROCESSABLE_ENTITY,
            PlaybackError::InvalidRequest(_) | PlaybackError::Resolve(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        Self::new(status, error.to_string())
    }
}

fn transition_response(report: TransitionReport) -> TransitionResponseDto {
    let outcome = match report.outcome {
        TransitionOutcome::Dispatched => "dispatched",
        TransitionOutcome::Superseded => "superseded",
    };
    TransitionResponseDto {
        outcome: outcome.to_string(),
        command_id: report.command.command_id.to_string(),
        kind: command_kind_name(report.command.kind).to_string(),
        scheduled_time: report.command.scheduled_time.value(),
        scheduled_at: timestamp_to_rfc3339(report.command.scheduled_time.value()),
        targets: report.targets,
        ready: report.ready,
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Debug endpoint: full engine state and client registry
pub async fn debug_sync_state(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let sync_state = state.engine.status().await;
    let clients = state.engine.clients().await;
    Json(serde_json::json!({
        "serverTime": state.engine.server_time().value(),
        "state": sync_state,
        "clients": clients,
    }))
}

/// `POST /api/playback/play`
pub async fn play(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PlayRequestDto>,
) -> Result<Json<TransitionResponseDto>, ApiError> {
    let request = PlayRequest {
        video_url: body.video_url,
        video_time: body.video_time,
        duration: body.duration,
    };
    let report = state.engine.play(request).await?;
    Ok(Json(transition_response(report)))
}

/// `POST /api/playback/pause`
pub async fn pause(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TransitionResponseDto>, ApiError> {
    let report = state.engine.pause().await?;
    Ok(Json(transition_response(report)))
}

/// `POST /api/playback/seek`
pub async fn seek(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SeekRequestDto>,
) -> Result<Json<TransitionResponseDto>, ApiError> {
    let report = state.engine.seek(body.video_time).await?;
    Ok(Json(transition_response(report)))
}

/// `POST /api/playback/stop`
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<TransitionResponseDto> {
    Json(transition_response(state.engine.stop().await))
}

/// `GET /api/playback`
pub async fn get_playback(State(state): State<Arc<AppState>>) -> Json<PlaybackStatusDto> {
    let sync_state = state.engine.status().await;
    let now = state.engine.server_time();

    // Domain Model から DTO への変換
    Json(PlaybackStatusDto {
        phase: format!("{:?}", sync_state.phase).to_lowercase(),
        is_playing: sync_state.is_playing,
        current_video: sync_state.current_video.as_ref().map(Into::into),
        pending_video: sync_state.pending_video.as_ref().map(Into::into),
        expected_position: sync_state.expected_position_at(now),
        average_latency_ms: sync_state.average_latency_across_players,
        last_command: sync_state.last_command.as_ref().map(Into::into),
        server_time: now.value(),
    })
}

/// `GET /api/clients`
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<ClientDto>> {
    let clients = state.engine.clients().await;
    Json(clients.iter().map(ClientDto::from).collect())
}

/// `GET /api/clients/{client_id}`
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientDto>, ApiError> {
    let client_id = ClientId::try_from(client_id)
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
    match state.engine.client(&client_id).await {
        Some(client) => Ok(Json(ClientDto::from(&client))),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("client '{}' not found", client_id),
        )),
    }
}
