//! Global playback state owned by the sync engine.

use serde::Serialize;

use super::{command::SyncCommand, value_object::Timestamp};

/// Phase of the engine's playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    /// No media loaded
    Idle,
    /// Preload broadcast, waiting for readiness
    Preloading,
    Playing,
    Paused,
}

/// Media currently coordinated across players
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentVideo {
    pub url: String,
    /// Server instant at which media position 0 would have played
    pub coordinated_start_time: Timestamp,
    pub paused_at_wall_clock: Option<Timestamp>,
    /// Duration in seconds, if known
    pub duration: Option<f64>,
}

impl CurrentVideo {
    /// Build a video whose position `video_time` plays at `scheduled_time`
    pub fn starting_at(
        url: String,
        video_time: f64,
        scheduled_time: Timestamp,
        duration: Option<f64>,
    ) -> Self {
        Self {
            url,
            coordinated_start_time: scheduled_time.plus_millis(-secs_to_millis(video_time)),
            paused_at_wall_clock: None,
            duration,
        }
    }

    /// Expected media position (seconds) at server instant `at`
    pub fn position_at(&self, at: Timestamp) -> f64 {
        let reference = match self.paused_at_wall_clock {
            Some(paused_at) if paused_at <= at => paused_at,
            _ => at,
        };
        let position = reference.millis_since(self.coordinated_start_time) as f64 / 1000.0;
        let position = position.max(0.0);
        match self.duration {
            Some(duration) if duration > 0.0 => position.min(duration),
            _ => position,
        }
    }
}

/// Transition that has been preloaded but not yet dispatched
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVideo {
    pub url: String,
    /// Position the transition starts from, in seconds
    pub video_time: f64,
    pub duration: Option<f64>,
    /// Phase the engine enters once the transition is dispatched
    pub phase: PlaybackPhase,
}

/// Singleton playback state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub phase: PlaybackPhase,
    pub current_video: Option<CurrentVideo>,
    /// Set while `phase` is `Preloading`
    pub pending_video: Option<PendingVideo>,
    pub is_playing: bool,
    pub last_command: Option<SyncCommand>,
    pub average_latency_across_players: f64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            current_video: None,
            pending_video: None,
            is_playing: false,
            last_command: None,
            average_latency_across_players: 0.0,
        }
    }
}

impl SyncState {
    /// Expected position of the current video at `at`, if any video is loaded
    pub fn expected_position_at(&self, at: Timestamp) -> Option<f64> {
        self.current_video.as_ref().map(|video| video.position_at(at))
    }
}

pub(crate) fn secs_to_millis(secs: f64) -> i64 {
    (secs * 1000.0).round() as i64
}
