//! Local playback model of the simulated display.
//!
//! Positions are in seconds, instants are local clock milliseconds. A running
//! model is anchored at the local instant its last transition fired, so the
//! position at any later instant is derived rather than ticked.

use lockstep_server::infrastructure::dto::websocket::{TransitionPayload, VideoStatus};

/// Which scheduled transition to apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Play,
    Pause,
    Seek,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Stopped { position: f64 },
    Running { anchor_position: f64, anchor_local: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackModel {
    url: Option<String>,
    buffered_url: Option<String>,
    duration: Option<f64>,
    motion: Motion,
    last_command: Option<String>,
}

impl Default for PlaybackModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackModel {
    pub fn new() -> Self {
        Self {
            url: None,
            buffered_url: None,
            duration: None,
            motion: Motion::Stopped { position: 0.0 },
            last_command: None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn buffered_url(&self) -> Option<&str> {
        self.buffered_url.as_deref()
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Option<f64>) {
        self.duration = duration;
    }

    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.motion, Motion::Running { .. })
    }

    /// Buffer `url` without disturbing what is currently playing
    pub fn preload(&mut self, url: &str) {
        self.buffered_url = Some(url.to_string());
    }

    /// Position at local instant `local_now`
    pub fn position_at(&self, local_now: i64) -> f64 {
        let position = match self.motion {
            Motion::Stopped { position } => position,
            Motion::Running {
                anchor_position,
                anchor_local,
            } => anchor_position + (local_now - anchor_local).max(0) as f64 / 1000.0,
        };
        self.clamp(position)
    }

    /// Apply a transition that fired at local instant `fired_at`.
    ///
    /// Any transition naming a different URL switches media first. A play
    /// then starts from `videoTime` (or 0). A seek keeps the current
    /// running/stopped state, except that a seek onto new media starts it.
    pub fn apply(&mut self, transition: Transition, payload: &TransitionPayload, fired_at: i64) {
        let current = self.position_at(fired_at);
        let switched = self.switch_media(payload.video_url.as_deref());
        match transition {
            Transition::Play => {
                let from = match payload.video_time {
                    Some(time) => time,
                    None if switched => 0.0,
                    None => current,
                };
                self.motion = Motion::Running {
                    anchor_position: self.clamp(from),
                    anchor_local: fired_at,
                };
            }
            Transition::Pause => {
                let at = match payload.video_time {
                    Some(time) => time,
                    None if switched => 0.0,
                    None => current,
                };
                self.motion = Motion::Stopped {
                    position: self.clamp(at),
                };
            }
            Transition::Seek => {
                let to = match payload.video_time {
                    Some(time) => time,
                    None if switched => 0.0,
                    None => current,
                };
                let to = self.clamp(to);
                self.motion = match self.motion {
                    Motion::Stopped { .. } if !switched => Motion::Stopped { position: to },
                    _ => Motion::Running {
                        anchor_position: to,
                        anchor_local: fired_at,
                    },
                };
            }
        }
        self.last_command = Some(payload.command_id.clone());
    }

    /// Load `url` if it differs from the current media
    fn switch_media(&mut self, url: Option<&str>) -> bool {
        match url {
            Some(url) if self.url.as_deref() != Some(url) => {
                self.url = Some(url.to_string());
                self.duration = None;
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, local_now: i64) -> VideoStatus {
        VideoStatus {
            url: self.url.clone(),
            position: self.position_at(local_now),
            duration: self.duration,
        }
    }

    fn clamp(&self, position: f64) -> f64 {
        let position = position.max(0.0);
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}
