//! WebSocket message DTOs.
//!
//! Every message is a JSON object with a `type` discriminator. Messages are
//! decoded once at the connection boundary into these closed enums.

use serde::{Deserialize, Serialize};

/// Server → client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges registration
    DeviceRegistered {
        device_id: String,
        assigned_name: String,
        server_time: i64,
    },
    /// Latency / clock offset probe
    ClockSyncPing { server_time: i64, ping_id: String },
    /// Asks a player to buffer the given media
    SyncPreload {
        video_url: String,
        command_id: String,
    },
    SyncPlay(TransitionPayload),
    SyncPause(TransitionPayload),
    SyncSeek(TransitionPayload),
    /// Drift probe; answered with a position report
    SyncCheckPosition { check_id: String },
    /// Liveness ping
    Heartbeat { server_time: i64 },
}

/// Coordinated transition, `scheduled_time` already adjusted for the recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub scheduled_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_time: Option<f64>,
    pub command_id: String,
    pub tolerance: u64,
}

/// Client → server messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Reply to `clock_sync_ping`
    ClockSyncResponse {
        ping_id: String,
        /// Echo of the probe's `serverTime`
        server_time: i64,
        client_time: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_time: Option<i64>,
    },
    /// Readiness report for a preload
    SyncReady {
        command_id: String,
        #[serde(default = "full_buffer")]
        buffer_level: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_duration: Option<f64>,
    },
    /// Reply to `sync_check_position`
    PositionReport {
        check_id: String,
        /// Playback position in seconds
        position: f64,
        /// Client clock reading when the position was captured
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_time: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    /// Unsolicited status
    StatusUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        buffer_level: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_video: Option<VideoStatus>,
    },
    /// Reply to `heartbeat`
    HeartbeatResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_time: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub position: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

fn full_buffer() -> f64 {
    1.0
}
