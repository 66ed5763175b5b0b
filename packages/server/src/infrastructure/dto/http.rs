//! HTTP API DTOs.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/playback/play`. Without `videoUrl` the paused video resumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequestDto {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_time: Option<f64>,
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Body of `POST /api/playback/seek`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekRequestDto {
    pub video_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponseDto {
    /// "dispatched" or "superseded"
    pub outcome: String,
    pub command_id: String,
    pub kind: String,
    pub scheduled_time: i64,
    pub scheduled_at: String,
    pub targets: usize,
    pub ready: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentVideoDto {
    pub url: String,
    pub coordinated_start_time: i64,
    pub paused_at: Option<i64>,
    pub duration: Option<f64>,
}

/// Transition waiting for readiness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVideoDto {
    pub url: String,
    pub video_time: f64,
    pub duration: Option<f64>,
    pub phase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDto {
    pub kind: String,
    pub command_id: String,
    pub video_url: Option<String>,
    pub video_time: Option<f64>,
    pub scheduled_time: i64,
    pub tolerance: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatusDto {
    pub phase: String,
    pub is_playing: bool,
    pub current_video: Option<CurrentVideoDto>,
    pub pending_video: Option<PendingVideoDto>,
    pub expected_position: Option<f64>,
    pub average_latency_ms: f64,
    pub last_command: Option<CommandDto>,
    pub server_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDto {
    pub id: String,
    pub role: String,
    pub assigned_name: String,
    pub status: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub capabilities: Vec<String>,
    pub clock_offset_ms: i64,
    pub average_latency_ms: f64,
    pub clock_synced: bool,
    pub is_ready: bool,
    pub buffer_level: f64,
    pub connected_at: String,
    pub last_activity: String,
    pub disconnected_at: Option<String>,
    pub current_video: Option<ReportedVideoDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedVideoDto {
    pub url: Option<String>,
    pub position: f64,
    pub duration: Option<f64>,
    pub reported_at: String,
}
