//! Engine events consumed by collaborators (e.g. an admin surface).

use serde::Serialize;

use super::{
    drift::DriftAssessment,
    entity::ClientStatus,
    state::PlaybackPhase,
    value_object::{CheckId, ClientId, ClientRole, Timestamp},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum EngineEvent {
    #[serde(rename_all = "camelCase")]
    DeviceConnected {
        client_id: ClientId,
        role: ClientRole,
        assigned_name: String,
        at: Timestamp,
    },
    #[serde(rename_all = "camelCase")]
    DeviceDisconnected {
        client_id: ClientId,
        reason: DisconnectReason,
        at: Timestamp,
    },
    #[serde(rename_all = "camelCase")]
    DeviceStatusChanged {
        client_id: ClientId,
        previous: ClientStatus,
        current: ClientStatus,
        at: Timestamp,
    },
    #[serde(rename_all = "camelCase")]
    PlaybackChanged {
        phase: PlaybackPhase,
        video_url: Option<String>,
        at: Timestamp,
    },
    #[serde(rename_all = "camelCase")]
    DriftReport {
        check_id: CheckId,
        assessment: DriftAssessment,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The connection closed
    Closed,
    /// No inbound message within the activity timeout
    Timeout,
    /// A write to the connection failed
    SendFailed,
}
