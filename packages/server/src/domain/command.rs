//! Coordinated playback commands.

use serde::Serialize;

use super::{
    entity::Client,
    timing::adjusted_scheduled_time,
    value_object::{CommandId, Timestamp},
};

/// Kind of coordinated transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Preload,
    Play,
    Pause,
    Seek,
    PositionCheck,
}

/// A transition issued by the scheduler. Never mutated after creation;
/// per-client adjusted instants are computed on the fly and not stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCommand {
    pub kind: CommandKind,
    pub command_id: CommandId,
    pub video_url: Option<String>,
    /// Seek target / start offset in seconds
    pub video_time: Option<f64>,
    /// Server wall-clock instant, before per-client adjustment
    pub scheduled_time: Timestamp,
    pub tolerance_ms: u64,
    pub issued_at: Timestamp,
}

impl SyncCommand {
    /// The `scheduledTime` to send to `client`, shifted by its clock estimates
    pub fn scheduled_time_for(&self, client: &Client) -> Timestamp {
        adjusted_scheduled_time(
            self.scheduled_time,
            client.clock_offset_ms,
            client.average_latency_ms,
        )
    }
}
