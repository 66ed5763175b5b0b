//! UseCase: coordinated playback transitions
//!
//! `play` and `seek` run in three steps: broadcast `sync_preload`, wait (bounded)
//! for `sync_ready` from the online players, then send each player the
//! transition with a deadline shifted onto its own clock. `pause` and `stop`
//! skip the preload and use a shorter buffer.
//!
//! Issuing any transition supersedes one still waiting for readiness; the
//! superseded transition is abandoned without sending its play/seek. While a
//! transition is waiting, `seek`, `pause` and `resume` act on its media rather
//! than on the video that was playing before it.

use std::{sync::Arc, time::Duration};

use serde::Serialize;

use lockstep_shared::time::Clock;

use crate::{
    config::SyncConfig,
    domain::{
        ClientId, CommandId, CommandKind, CurrentVideo, PendingVideo, PlaybackPhase, SyncCommand,
        Timestamp,
        timing::{coordination_buffer_ms, readiness_deadline_ms},
    },
};

use super::{
    client_registry::ClientRegistry,
    error::PlaybackError,
    readiness::{ReadinessOutcome, ReadinessTracker},
    sync_state::SyncStateStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The transition was sent to the players
    Dispatched,
    /// A newer transition replaced this one before it was sent
    Superseded,
}

/// Result of one transition request
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionReport {
    pub outcome: TransitionOutcome,
    pub command: SyncCommand,
    /// Players the transition was addressed to
    pub targets: usize,
    /// Players that reported ready before dispatch
    pub ready: usize,
}

pub struct CommandScheduler {
    registry: Arc<ClientRegistry>,
    readiness: Arc<ReadinessTracker>,
    state: Arc<SyncStateStore>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl CommandScheduler {
    pub fn new(
        registry: Arc<ClientRegistry>,
        readiness: Arc<ReadinessTracker>,
        state: Arc<SyncStateStore>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            readiness,
            state,
            clock,
            config,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Start `video_url` at `video_time` seconds on every online player
    pub async fn play(
        &self,
        video_url: String,
        video_time: f64,
        duration: Option<f64>,
    ) -> Result<TransitionReport, PlaybackError> {
        validate_video_time(video_time)?;
        Ok(self
            .coordinate(
                CommandKind::Play,
                video_url,
                video_time,
                duration,
                PlaybackPhase::Playing,
            )
            .await)
    }

    /// Play the loaded video from the position the server timeline reaches at
    /// dispatch (the paused position when paused)
    pub async fn resume(&self) -> Result<TransitionReport, PlaybackError> {
        let snapshot = self.state.snapshot().await;
        if let Some(pending) = snapshot.pending_video {
            return self
                .play(pending.url, pending.video_time, pending.duration)
                .await;
        }
        let video = snapshot
            .current_video
            .ok_or(PlaybackError::NothingToResume)?;
        let position = self.position_at_dispatch(&video).await;
        self.play(video.url, position, video.duration).await
    }

    /// Re-seek every player onto the server timeline while playing
    pub async fn realign(&self) -> Result<TransitionReport, PlaybackError> {
        let snapshot = self.state.snapshot().await;
        let video = match snapshot.current_video {
            Some(video) if snapshot.is_playing => video,
            _ => {
                return Err(PlaybackError::InvalidRequest(
                    "nothing is playing".to_string(),
                ));
            }
        };
        let position = self.position_at_dispatch(&video).await;
        Ok(self
            .coordinate(
                CommandKind::Seek,
                video.url,
                position,
                video.duration,
                PlaybackPhase::Playing,
            )
            .await)
    }

    async fn coordination_buffer_ms(&self) -> u64 {
        coordination_buffer_ms(
            self.state.average_latency().await,
            self.config.preload_buffer_ms,
            self.config.latency_multiplier,
            self.config.latency_margin_ms,
        )
    }

    async fn position_at_dispatch(&self, video: &CurrentVideo) -> f64 {
        let buffer_ms = self.coordination_buffer_ms().await;
        video.position_at(self.now().plus_millis(buffer_ms as i64))
    }

    /// Move every player to `video_time`, keeping the playing/paused state
    pub async fn seek(&self, video_time: f64) -> Result<TransitionReport, PlaybackError> {
        validate_video_time(video_time)?;
        let snapshot = self.state.snapshot().await;
        let (url, duration, phase) = match (snapshot.pending_video, snapshot.current_video) {
            (Some(pending), _) => (pending.url, pending.duration, pending.phase),
            (None, Some(video)) => {
                let phase = if video.paused_at_wall_clock.is_some() {
                    PlaybackPhase::Paused
                } else {
                    PlaybackPhase::Playing
                };
                (video.url, video.duration, phase)
            }
            (None, None) => return Err(PlaybackError::NothingToResume),
        };
        let video_time = match duration {
            Some(duration) => video_time.min(duration),
            None => video_time,
        };

        Ok(self
            .coordinate(CommandKind::Seek, url, video_time, duration, phase)
            .await)
    }

    /// Pause every player at the same instant
    pub async fn pause(&self) -> Result<TransitionReport, PlaybackError> {
        let snapshot = self.state.snapshot().await;
        if snapshot.pending_video.is_none() && snapshot.current_video.is_none() {
            return Err(PlaybackError::NothingToResume);
        }

        let issued_at = self.now();
        let scheduled_time = issued_at.plus_millis(self.config.pause_buffer_ms as i64);
        let command_id = CommandId::generate();
        self.supersede(&command_id).await;

        // 待機中の遷移は supersede で止まったので、その再生位置で一時停止します
        let snapshot = self.state.snapshot().await;
        let (video, pending) = match (snapshot.pending_video, snapshot.current_video) {
            (Some(pending), _) => {
                let mut video = CurrentVideo::starting_at(
                    pending.url.clone(),
                    pending.video_time,
                    scheduled_time,
                    pending.duration,
                );
                video.paused_at_wall_clock = Some(scheduled_time);
                (video, true)
            }
            (None, Some(video)) => (video, false),
            (None, None) => return Err(PlaybackError::NothingToResume),
        };

        let command = SyncCommand {
            kind: CommandKind::Pause,
            command_id,
            video_url: Some(video.url.clone()),
            video_time: Some(video.position_at(scheduled_time)),
            scheduled_time,
            tolerance_ms: self.config.tolerance_ms,
            issued_at,
        };
        let targets = self.dispatch(&command).await;
        if pending {
            self.state
                .apply_transition(command.clone(), video, PlaybackPhase::Paused)
                .await;
        } else {
            self.state.apply_pause(command.clone(), scheduled_time).await;
        }

        Ok(TransitionReport {
            outcome: TransitionOutcome::Dispatched,
            command,
            targets,
            ready: targets,
        })
    }

    /// Pause every player and unload the current video
    pub async fn stop(&self) -> TransitionReport {
        let issued_at = self.now();
        let scheduled_time = issued_at.plus_millis(self.config.pause_buffer_ms as i64);
        let command_id = CommandId::generate();
        self.supersede(&command_id).await;

        let command = SyncCommand {
            kind: CommandKind::Pause,
            command_id,
            video_url: None,
            video_time: None,
            scheduled_time,
            tolerance_ms: self.config.tolerance_ms,
            issued_at,
        };
        let targets = self.dispatch(&command).await;
        self.state.reset_idle(command.clone()).await;

        TransitionReport {
            outcome: TransitionOutcome::Dispatched,
            command,
            targets,
            ready: targets,
        }
    }

    async fn supersede(&self, command_id: &CommandId) {
        if let Some(previous) = self.readiness.begin(command_id.clone(), &[]).await {
            tracing::debug!("Command {} supersedes {}", command_id, previous);
        }
    }

    async fn coordinate(
        &self,
        kind: CommandKind,
        video_url: String,
        video_time: f64,
        duration: Option<f64>,
        phase: PlaybackPhase,
    ) -> TransitionReport {
        let issued_at = self.now();
        let buffer_ms = self.coordination_buffer_ms().await;
        let scheduled_time = issued_at.plus_millis(buffer_ms as i64);
        let command_id = CommandId::generate();

        let targets: Vec<ClientId> = self
            .registry
            .online_players()
            .await
            .into_iter()
            .map(|client| client.id)
            .collect();

        if let Some(previous) = self.readiness.begin(command_id.clone(), &targets).await {
            tracing::info!("Command {} supersedes {}", command_id, previous);
        }
        self.registry.reset_readiness(&targets).await;
        self.state
            .enter_preloading(PendingVideo {
                url: video_url.clone(),
                video_time,
                duration,
                phase,
            })
            .await;

        tracing::info!(
            "{:?} {} at {:.3}s: preloading {} player(s), buffer {}ms",
            kind,
            video_url,
            video_time,
            targets.len(),
            buffer_ms
        );
        let preload = SyncCommand {
            kind: CommandKind::Preload,
            command_id: command_id.clone(),
            video_url: Some(video_url.clone()),
            video_time: None,
            scheduled_time,
            tolerance_ms: self.config.tolerance_ms,
            issued_at,
        };
        let failed = self
            .registry
            .broadcast(targets.clone(), &preload.to_server_message(scheduled_time))
            .await;

        let command = SyncCommand {
            kind,
            command_id: command_id.clone(),
            video_url: Some(video_url.clone()),
            video_time: Some(video_time),
            scheduled_time,
            tolerance_ms: self.config.tolerance_ms,
            issued_at,
        };

        let wait = Duration::from_millis(readiness_deadline_ms(
            buffer_ms,
            self.config.readiness_margin_ms,
        ));
        let ready = match self.readiness.wait(&command_id, wait).await {
            ReadinessOutcome::Superseded => {
                tracing::info!("Command {} superseded before dispatch", command_id);
                return TransitionReport {
                    outcome: TransitionOutcome::Superseded,
                    command,
                    targets: targets.len(),
                    ready: 0,
                };
            }
            ReadinessOutcome::TimedOut { pending } => {
                tracing::warn!(
                    "{} of {} player(s) not ready for {}; dispatching anyway",
                    pending,
                    targets.len(),
                    command_id
                );
                targets.len().saturating_sub(pending)
            }
            ReadinessOutcome::AllReady => targets.len() - failed.len(),
        };

        let delivered = self.dispatch(&command).await;
        if !self.readiness.is_current(&command_id).await {
            // 送信中に次の遷移が始まった場合、状態はそちらが更新します
            return TransitionReport {
                outcome: TransitionOutcome::Dispatched,
                command,
                targets: delivered,
                ready,
            };
        }

        let duration = match duration {
            Some(duration) => Some(duration),
            None => self.readiness.reported_duration(&command_id).await,
        };
        let mut video = CurrentVideo::starting_at(video_url, video_time, scheduled_time, duration);
        if phase == PlaybackPhase::Paused {
            video.paused_at_wall_clock = Some(scheduled_time);
        }
        self.state.apply_transition(command.clone(), video, phase).await;

        TransitionReport {
            outcome: TransitionOutcome::Dispatched,
            command,
            targets: delivered,
            ready,
        }
    }

    /// Send `command` to each online player with its own adjusted deadline
    async fn dispatch(&self, command: &SyncCommand) -> usize {
        let mut delivered = 0;
        for client in self.registry.online_players().await {
            let scheduled = command.scheduled_time_for(&client);
            let message = command.to_server_message(scheduled);
            if self.registry.send(&client.id, &message).await.is_ok() {
                delivered += 1;
            }
        }
        tracing::info!(
            "{:?} {} dispatched to {} player(s) for {}",
            command.kind,
            command.command_id,
            delivered,
            command.scheduled_time.value()
        );
        delivered
    }
}

fn validate_video_time(video_time: f64) -> Result<(), PlaybackError> {
    if video_time.is_finite() && video_time >= 0.0 {
        Ok(())
    } else {
        Err(PlaybackError::InvalidRequest(format!(
            "video time must be a non-negative number of seconds, got {}",
            video_time
        )))
    }
}
