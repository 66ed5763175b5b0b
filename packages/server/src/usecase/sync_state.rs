//! SyncState store
//!
//! エンジン全体の再生状態 (`SyncState`) を保持します。状態遷移は
//! CommandScheduler からのみ呼ばれ、平均レイテンシは ClientRegistry が更新します。

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};

use lockstep_shared::time::Clock;

use crate::domain::{
    CurrentVideo, EngineEvent, PendingVideo, PlaybackPhase, SyncCommand, SyncState, Timestamp,
};

pub struct SyncStateStore {
    state: Mutex<SyncState>,
    events: broadcast::Sender<EngineEvent>,
    clock: Arc<dyn Clock>,
}

impl SyncStateStore {
    pub fn new(events: broadcast::Sender<EngineEvent>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(SyncState::default()),
            events,
            clock,
        }
    }

    pub async fn snapshot(&self) -> SyncState {
        self.state.lock().await.clone()
    }

    pub async fn average_latency(&self) -> f64 {
        self.state.lock().await.average_latency_across_players
    }

    pub async fn set_average_latency(&self, average_latency_ms: f64) {
        self.state.lock().await.average_latency_across_players = average_latency_ms;
    }

    /// Enter `Preloading` for `pending`, returning the phase that was left
    pub(crate) async fn enter_preloading(&self, pending: PendingVideo) -> PlaybackPhase {
        let mut state = self.state.lock().await;
        let previous = state.phase;
        state.phase = PlaybackPhase::Preloading;
        state.pending_video = Some(pending);
        state.is_playing = false;
        self.emit_phase(&state);
        previous
    }

    /// Record a dispatched play/seek and the resulting phase
    pub(crate) async fn apply_transition(
        &self,
        command: SyncCommand,
        video: CurrentVideo,
        phase: PlaybackPhase,
    ) {
        let mut state = self.state.lock().await;
        state.phase = phase;
        state.is_playing = phase == PlaybackPhase::Playing;
        state.current_video = Some(video);
        state.pending_video = None;
        state.last_command = Some(command);
        self.emit_phase(&state);
    }

    /// Record a dispatched pause scheduled for `paused_at`
    pub(crate) async fn apply_pause(&self, command: SyncCommand, paused_at: Timestamp) {
        let mut state = self.state.lock().await;
        if let Some(video) = state.current_video.as_mut() {
            video.paused_at_wall_clock = Some(paused_at);
        }
        state.phase = PlaybackPhase::Paused;
        state.pending_video = None;
        state.is_playing = false;
        state.last_command = Some(command);
        self.emit_phase(&state);
    }

    /// Unload the current video
    pub(crate) async fn reset_idle(&self, command: SyncCommand) {
        let mut state = self.state.lock().await;
        state.phase = PlaybackPhase::Idle;
        state.is_playing = false;
        state.current_video = None;
        state.pending_video = None;
        state.last_command = Some(command);
        self.emit_phase(&state);
    }

    fn emit_phase(&self, state: &SyncState) {
        let _ = self.events.send(EngineEvent::PlaybackChanged {
            phase: state.phase,
            video_url: state.current_video.as_ref().map(|video| video.url.clone()),
            at: Timestamp::new(self.clock.now_millis()),
        });
    }
}
