//! Entities
//!
//! 識別子を持ち、ライフサイクルを通じて状態が変化するドメインオブジェクト。
//! `Client` は ClientRegistry (Repository) が排他的に所有し、他のコンポーネントは
//! スナップショットを参照するだけです。

use serde::Serialize;

use super::{
    timing::{ClockSample, smooth_latency},
    value_object::{ClientId, ClientRole, CommandId, Timestamp},
};

/// Connection-level facts supplied at registration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub capabilities: Vec<String>,
    /// Human-readable name requested by the device, if any
    pub requested_name: Option<String>,
}

/// Liveness of a registered client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Online,
    /// Disconnected or timed out; record kept for diagnostics until purged
    Offline,
    /// A write to the connection failed
    Error,
}

/// Last media state reported by a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoReport {
    pub url: Option<String>,
    /// Playback position in seconds
    pub position: f64,
    /// Media duration in seconds, if known
    pub duration: Option<f64>,
    pub reported_at: Timestamp,
}

/// A registered device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: ClientId,
    pub role: ClientRole,
    pub assigned_name: String,
    pub metadata: ClientMetadata,
    pub status: ClientStatus,
    /// Client clock minus estimated server time at the client (ms)
    pub clock_offset_ms: i64,
    /// Smoothed one-way latency (ms)
    pub average_latency_ms: f64,
    /// Number of completed clock probes
    pub clock_samples: u32,
    pub connected_at: Timestamp,
    pub last_activity: Timestamp,
    pub disconnected_at: Option<Timestamp>,
    pub is_ready: bool,
    /// Command the readiness flag belongs to
    pub ready_command: Option<CommandId>,
    /// Buffer fill reported by the client (0.0 - 1.0)
    pub buffer_level: f64,
    pub current_video: Option<VideoReport>,
}

impl Client {
    pub fn new(
        id: ClientId,
        role: ClientRole,
        assigned_name: String,
        metadata: ClientMetadata,
        connected_at: Timestamp,
    ) -> Self {
        Self {
            id,
            role,
            assigned_name,
            metadata,
            status: ClientStatus::Online,
            clock_offset_ms: 0,
            average_latency_ms: 0.0,
            clock_samples: 0,
            connected_at,
            last_activity: connected_at,
            disconnected_at: None,
            is_ready: false,
            ready_command: None,
            buffer_level: 0.0,
            current_video: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ClientStatus::Online
    }

    /// Online players are the only clients that receive playback commands
    pub fn participates_in_playback(&self) -> bool {
        self.role.is_player() && self.is_online()
    }

    /// Whether at least one clock probe has completed
    pub fn is_clock_synced(&self) -> bool {
        self.clock_samples > 0
    }

    /// Record inbound activity. Returns `true` if the client came back online.
    pub fn touch(&mut self, at: Timestamp) -> bool {
        self.last_activity = at;
        if self.status == ClientStatus::Online {
            return false;
        }
        self.status = ClientStatus::Online;
        self.disconnected_at = None;
        true
    }

    /// Transition to `status`, stamping the disconnect time when leaving `Online`.
    /// Returns the previous status.
    pub fn set_status(&mut self, status: ClientStatus, at: Timestamp) -> ClientStatus {
        let previous = self.status;
        self.status = status;
        match status {
            ClientStatus::Online => self.disconnected_at = None,
            ClientStatus::Offline | ClientStatus::Error => {
                if previous == ClientStatus::Online || self.disconnected_at.is_none() {
                    self.disconnected_at = Some(at);
                }
                self.is_ready = false;
            }
        }
        previous
    }

    /// Apply a completed clock probe: latency is smoothed, offset is overwritten
    pub fn record_clock_sample(&mut self, sample: ClockSample) {
        self.average_latency_ms = smooth_latency(self.average_latency_ms, sample.latency_ms);
        self.clock_offset_ms = sample.offset_ms;
        self.clock_samples = self.clock_samples.saturating_add(1);
    }

    pub fn reset_readiness(&mut self) {
        self.is_ready = false;
        self.ready_command = None;
    }

    pub fn mark_ready(&mut self, command_id: CommandId, buffer_level: f64) {
        self.is_ready = true;
        self.ready_command = Some(command_id);
        self.buffer_level = buffer_level.clamp(0.0, 1.0);
    }

    /// Whether the client was offline/errored for at least `grace_ms` at `now`
    pub fn is_purgeable(&self, now: Timestamp, grace_ms: i64) -> bool {
        match (self.status, self.disconnected_at) {
            (ClientStatus::Online, _) => false,
            (_, Some(since)) => now.millis_since(since) >= grace_ms,
            (_, None) => false,
        }
    }
}
