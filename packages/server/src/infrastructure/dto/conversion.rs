//! Conversion logic between DTOs and domain entities.

use lockstep_shared::time::timestamp_to_rfc3339;

use crate::domain::{
    Client, CommandKind, CurrentVideo, PendingVideo, SyncCommand, Timestamp, VideoReport,
};
use crate::infrastructure::dto::{http as dto, websocket as ws};

// ========================================
// DTO → Domain Entity
// ========================================

impl ws::VideoStatus {
    pub fn into_report(self, reported_at: Timestamp) -> VideoReport {
        VideoReport {
            url: self.url,
            position: self.position,
            duration: self.duration,
            reported_at,
        }
    }
}

// ========================================
// Domain Entity → DTO
// ========================================

pub fn command_kind_name(kind: CommandKind) -> &'static str {
    match kind {
        CommandKind::Preload => "preload",
        CommandKind::Play => "play",
        CommandKind::Pause => "pause",
        CommandKind::Seek => "seek",
        CommandKind::PositionCheck => "position_check",
    }
}

impl SyncCommand {
    /// Wire message for one client, with `scheduledTime` already adjusted
    pub fn to_server_message(&self, scheduled_time: Timestamp) -> ws::ServerMessage {
        match self.kind {
            CommandKind::Preload => ws::ServerMessage::SyncPreload {
                video_url: self.video_url.clone().unwrap_or_default(),
                command_id: self.command_id.to_string(),
            },
            CommandKind::PositionCheck => ws::ServerMessage::SyncCheckPosition {
                check_id: self.command_id.to_string(),
            },
            CommandKind::Play | CommandKind::Pause | CommandKind::Seek => {
                let payload = ws::TransitionPayload {
                    video_url: self.video_url.clone(),
                    scheduled_time: scheduled_time.value(),
                    video_time: self.video_time,
                    command_id: self.command_id.to_string(),
                    tolerance: self.tolerance_ms,
                };
                match self.kind {
                    CommandKind::Play => ws::ServerMessage::SyncPlay(payload),
                    CommandKind::Pause => ws::ServerMessage::SyncPause(payload),
                    _ => ws::ServerMessage::SyncSeek(payload),
                }
            }
        }
    }
}

impl From<&SyncCommand> for dto::CommandDto {
    fn from(command: &SyncCommand) -> Self {
        Self {
            kind: command_kind_name(command.kind).to_string(),
            command_id: command.command_id.to_string(),
            video_url: command.video_url.clone(),
            video_time: command.video_time,
            scheduled_time: command.scheduled_time.value(),
            tolerance: command.tolerance_ms,
        }
    }
}

impl From<&CurrentVideo> for dto::CurrentVideoDto {
    fn from(video: &CurrentVideo) -> Self {
        Self {
            url: video.url.clone(),
            coordinated_start_time: video.coordinated_start_time.value(),
            paused_at: video.paused_at_wall_clock.map(|at| at.value()),
            duration: video.duration,
        }
    }
}

impl From<&PendingVideo> for dto::PendingVideoDto {
    fn from(pending: &PendingVideo) -> Self {
        Self {
            url: pending.url.clone(),
            video_time: pending.video_time,
            duration: pending.duration,
            phase: format!("{:?}", pending.phase).to_lowercase(),
        }
    }
}

impl From<&VideoReport> for dto::ReportedVideoDto {
    fn from(report: &VideoReport) -> Self {
        Self {
            url: report.url.clone(),
            position: report.position,
            duration: report.duration,
            reported_at: timestamp_to_rfc3339(report.reported_at.value()),
        }
    }
}

impl From<&Client> for dto::ClientDto {
    fn from(client: &Client) -> Self {
        Self {
            id: client.id.to_string(),
            role: client.role.to_string(),
            assigned_name: client.assigned_name.clone(),
            status: format!("{:?}", client.status).to_lowercase(),
            ip_address: client.metadata.ip_address.clone(),
            user_agent: client.metadata.user_agent.clone(),
            capabilities: client.metadata.capabilities.clone(),
            clock_offset_ms: client.clock_offset_ms,
            average_latency_ms: client.average_latency_ms,
            clock_synced: client.is_clock_synced(),
            is_ready: client.is_ready,
            buffer_level: client.buffer_level,
            connected_at: timestamp_to_rfc3339(client.connected_at.value()),
            last_activity: timestamp_to_rfc3339(client.last_activity.value()),
            disconnected_at: client
                .disconnected_at
                .map(|at| timestamp_to_rfc3339(at.value())),
            current_video: client.current_video.as_ref().map(Into::into),
        }
    }
}
