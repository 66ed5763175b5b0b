//! UseCase: Synchronization Engine facade
//!
//! Owns the single `SyncState` and wires the registry, clock synchronizer,
//! command scheduler, drift monitor and liveness monitor together. The
//! transport layer only talks to this type: it hands over connections,
//! decoded inbound messages and control requests, and subscribes to
//! engine events.
//!
//! Drift policy: the server timeline (`coordinatedStartTime`) is the anchor.
//! Every completed position check produces a `DriftReport` event; with
//! `auto_realign` enabled, a deviation above `realign_threshold_ms`
//! additionally re-seeks every player to the expected position.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use lockstep_shared::time::Clock;

use crate::{
    config::SyncConfig,
    domain::{
        CheckId, Client, ClientId, ClientRepository, CommandId, DriftAssessment, EngineEvent,
        MediaResolver, MessagePusher, PingId, PlaybackPhase, SyncState, Timestamp, VideoReport,
    },
    infrastructure::dto::websocket::ClientMessage,
};

use super::{
    client_registry::{ClientRegistry, Registration},
    clock_sync::ClockSynchronizer,
    command_scheduler::{CommandScheduler, TransitionReport},
    drift_monitor::{DriftMonitor, DriftTick},
    error::{PlaybackError, RegisterError},
    liveness::{LivenessMonitor, LivenessTick},
    readiness::ReadinessTracker,
    sync_state::SyncStateStore,
};

const EVENT_CAPACITY: usize = 256;

/// A `play` request: a new video, or a resume when `video_url` is absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayRequest {
    pub video_url: Option<String>,
    pub video_time: Option<f64>,
    pub duration: Option<f64>,
}

pub struct SyncEngine {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<EngineEvent>,
    state: Arc<SyncStateStore>,
    registry: Arc<ClientRegistry>,
    clock_sync: Arc<ClockSynchronizer>,
    readiness: Arc<ReadinessTracker>,
    scheduler: Arc<CommandScheduler>,
    drift: Arc<DriftMonitor>,
    liveness: Arc<LivenessMonitor>,
    media: Arc<dyn MediaResolver>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        repository: Arc<dyn ClientRepository>,
        message_pusher: Arc<dyn MessagePusher>,
        media: Arc<dyn MediaResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = Arc::new(SyncStateStore::new(events.clone(), clock.clone()));
        let readiness = Arc::new(ReadinessTracker::new());
        let registry = Arc::new(ClientRegistry::new(
            repository,
            message_pusher,
            readiness.clone(),
            state.clone(),
            events.clone(),
            clock.clone(),
        ));
        let clock_sync = Arc::new(ClockSynchronizer::new(
            registry.clone(),
            clock.clone(),
            config.clock_sync_interval.as_millis() as i64,
        ));
        let scheduler = Arc::new(CommandScheduler::new(
            registry.clone(),
            readiness.clone(),
            state.clone(),
            clock.clone(),
            config.clone(),
        ));
        let drift = Arc::new(DriftMonitor::new(
            registry.clone(),
            state.clone(),
            events.clone(),
            clock.clone(),
            config.tolerance_ms,
        ));
        let liveness = Arc::new(LivenessMonitor::new(
            registry.clone(),
            clock.clone(),
            config.activity_timeout_ms(),
            config.purge_grace_ms(),
        ));

        Self {
            config,
            clock,
            events,
            state,
            registry,
            clock_sync,
            readiness,
            scheduler,
            drift,
            liveness,
            media,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Spawn the clock-sync, liveness and drift loops
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let engine = self.clone();
        tasks.push(spawn_periodic(self.config.clock_sync_interval, move || {
            let engine = engine.clone();
            async move {
                engine.run_clock_sync().await;
            }
        }));

        let engine = self.clone();
        tasks.push(spawn_periodic(self.config.heartbeat_interval, move || {
            let engine = engine.clone();
            async move {
                engine.run_liveness().await;
            }
        }));

        let engine = self.clone();
        tasks.push(spawn_periodic(self.config.drift_check_interval, move || {
            let engine = engine.clone();
            async move {
                engine.run_drift_check().await;
            }
        }));

        tracing::info!(
            "Sync engine started (clock sync {:?}, heartbeat {:?}, drift check {:?})",
            self.config.clock_sync_interval,
            self.config.heartbeat_interval,
            self.config.drift_check_interval
        );
    }

    /// Abort the background loops
    pub async fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            tracing::info!("Sync engine stopped");
        }
    }

    // ---- connections ----

    pub async fn is_connected(&self, client_id: &ClientId) -> bool {
        self.registry.is_online(client_id).await
    }

    /// Register a connection and probe its clock right away
    pub async fn connect(&self, registration: Registration) -> Result<Client, RegisterError> {
        if let Some(client_id) = &registration.client_id
            && self.registry.is_online(client_id).await
        {
            return Err(RegisterError::DuplicateClientId(client_id.to_string()));
        }

        let client = self.registry.register(registration).await;
        if let Err(e) = self.clock_sync.probe(&client.id).await {
            tracing::warn!("Initial clock probe to {} failed: {}", client.id, e);
        }
        Ok(client)
    }

    /// Handle a closed connection. Closes of a connection that has since been
    /// replaced by a re-registration are ignored.
    pub async fn disconnect(&self, client_id: &ClientId, connected_at: Timestamp) {
        match self.registry.get(client_id).await {
            Some(client) if client.connected_at == connected_at => {
                self.registry.unregister(client_id).await;
            }
            Some(_) => {
                tracing::debug!("Ignoring close of a replaced connection for {}", client_id);
            }
            None => {}
        }
    }

    /// Count an inbound frame that could not be decoded as activity
    pub async fn record_activity(&self, client_id: &ClientId) {
        if let Err(e) = self.registry.touch(client_id).await {
            tracing::debug!("Activity from unknown client: {}", e);
        }
    }

    /// Dispatch one decoded inbound message
    pub async fn handle_message(&self, client_id: &ClientId, message: ClientMessage) {
        if let Err(e) = self.registry.touch(client_id).await {
            tracing::warn!("Dropping message from unknown client: {}", e);
            return;
        }

        match message {
            ClientMessage::ClockSyncResponse {
                ping_id,
                server_time,
                client_time,
                ..
            } => {
                self.clock_sync
                    .handle_response(client_id, &PingId::from(ping_id), server_time, client_time)
                    .await;
            }
            ClientMessage::SyncReady {
                command_id,
                buffer_level,
                video_duration,
            } => {
                let command_id = CommandId::from(command_id);
                if !self
                    .readiness
                    .mark_ready(client_id, &command_id, video_duration)
                    .await
                {
                    tracing::debug!(
                        "Ignoring readiness of {} for stale command {}",
                        client_id,
                        command_id
                    );
                    return;
                }
                tracing::debug!("{} ready for {}", client_id, command_id);
                if let Err(e) = self
                    .registry
                    .mark_ready(client_id, command_id, buffer_level)
                    .await
                {
                    tracing::debug!("Failed to record readiness: {}", e);
                }
            }
            ClientMessage::PositionReport {
                check_id,
                position,
                client_time,
                video_url,
                duration,
            } => {
                let report = VideoReport {
                    url: video_url,
                    position,
                    duration,
                    reported_at: self.now(),
                };
                let _ = self
                    .registry
                    .update_report(client_id, None, Some(report))
                    .await;
                if let Some(assessment) = self
                    .drift
                    .handle_report(client_id, &CheckId::from(check_id), position, client_time)
                    .await
                {
                    self.apply_realign_policy(&assessment).await;
                }
            }
            ClientMessage::StatusUpdate {
                buffer_level,
                current_video,
            } => {
                let now = self.now();
                let _ = self
                    .registry
                    .update_report(
                        client_id,
                        buffer_level,
                        current_video.map(|video| video.into_report(now)),
                    )
                    .await;
            }
            ClientMessage::HeartbeatResponse { .. } => {}
        }
    }

    // ---- playback control ----

    pub async fn play(&self, request: PlayRequest) -> Result<TransitionReport, PlaybackError> {
        match request.video_url {
            Some(reference) => {
                let video_url = self.media.resolve(&reference).await?;
                self.scheduler
                    .play(
                        video_url,
                        request.video_time.unwrap_or(0.0),
                        request.duration,
                    )
                    .await
            }
            None => self.scheduler.resume().await,
        }
    }

    pub async fn pause(&self) -> Result<TransitionReport, PlaybackError> {
        self.scheduler.pause().await
    }

    pub async fn seek(&self, video_time: f64) -> Result<TransitionReport, PlaybackError> {
        self.scheduler.seek(video_time).await
    }

    pub async fn stop(&self) -> TransitionReport {
        self.scheduler.stop().await
    }

    // ---- queries ----

    pub async fn status(&self) -> SyncState {
        self.state.snapshot().await
    }

    pub async fn clients(&self) -> Vec<Client> {
        self.registry.list().await
    }

    pub async fn client(&self, client_id: &ClientId) -> Option<Client> {
        self.registry.get(client_id).await
    }

    pub fn server_time(&self) -> Timestamp {
        self.now()
    }

    // ---- periodic work ----

    pub async fn run_clock_sync(&self) -> usize {
        self.clock_sync.probe_all().await
    }

    pub async fn run_liveness(&self) -> LivenessTick {
        self.liveness.tick().await
    }

    pub async fn run_drift_check(&self) -> DriftTick {
        let tick = self.drift.tick().await;
        if let Some(assessment) = &tick.evaluated {
            self.apply_realign_policy(assessment).await;
        }
        tick
    }

    async fn apply_realign_policy(&self, assessment: &DriftAssessment) {
        if !self.config.auto_realign {
            return;
        }
        let Some(worst) = assessment.worst_deviation_ms() else {
            return;
        };
        if worst <= self.config.realign_threshold_ms as i64 {
            return;
        }
        if self.state.snapshot().await.phase != PlaybackPhase::Playing {
            return;
        }

        tracing::info!(
            "Deviation {}ms exceeds {}ms; realigning players",
            worst,
            self.config.realign_threshold_ms
        );
        // The seek waits for readiness; do not hold up the caller's loop.
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler.realign().await {
                tracing::warn!("Realign failed: {}", e);
            }
        });
    }
}

fn spawn_periodic<F, Fut>(period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            job().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ClientMetadata, ClientRole, ClientStatus, ResolveError},
        infrastructure::{
            dto::websocket::ServerMessage, media::DirectUrlResolver,
            message_pusher::WebSocketMessagePusher, repository::InMemoryClientRepository,
        },
        usecase::command_scheduler::TransitionOutcome,
    };
    use lockstep_shared::time::ManualClock;
    use tokio::sync::mpsc;

    const T0: i64 = 1_700_000_000_000;

    fn engine_with(config: SyncConfig) -> (Arc<SyncEngine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let engine = Arc::new(SyncEngine::new(
            config,
            Arc::new(InMemoryClientRepository::new()),
            Arc::new(WebSocketMessagePusher::new()),
            Arc::new(DirectUrlResolver),
            clock.clone(),
        ));
        (engine, clock)
    }

    fn engine() -> (Arc<SyncEngine>, Arc<ManualClock>) {
        engine_with(SyncConfig::default())
    }

    struct Device {
        id: ClientId,
        connected_at: Timestamp,
        rx: mpsc::UnboundedReceiver<String>,
    }

    impl Device {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(raw) = self.rx.try_recv() {
                messages.push(serde_json::from_str(&raw).unwrap());
            }
            messages
        }

        /// Answer every pending clock probe as a client with the given skew
        async fn answer_probes(&mut self, engine: &SyncEngine, clock: &ManualClock, skew_ms: i64) {
            for message in self.drain() {
                if let ServerMessage::ClockSyncPing {
                    server_time,
                    ping_id,
                } = message
                {
                    let client_time = clock.now_millis() + skew_ms;
                    engine
                        .handle_message(
                            &self.id,
                            ClientMessage::ClockSyncResponse {
                                ping_id,
                                server_time,
                                client_time,
                                response_time: None,
                            },
                        )
                        .await;
                }
            }
        }
    }

    async fn connect(engine: &SyncEngine, id: &str, role: ClientRole) -> Device {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = engine
            .connect(Registration {
                client_id: Some(ClientId::new(id.to_string()).unwrap()),
                role,
                metadata: ClientMetadata::default(),
                sender: tx,
            })
            .await
            .unwrap();
        Device {
            id: client.id,
            connected_at: client.connected_at,
            rx,
        }
    }

    #[tokio::test]
    async fn test_connect_registers_and_probes() {
        // テスト項目: 接続で device_registered と clock_sync_ping が送られる
        // given (前提条件):
        let (engine, _clock) = engine();
        let mut events = engine.subscribe();

        // when (操作):
        let mut device = connect(&engine, "tv-1", ClientRole::Player).await;

        // then (期待する結果):
        let messages = device.drain();
        assert!(matches!(messages[0], ServerMessage::DeviceRegistered { .. }));
        assert!(matches!(messages[1], ServerMessage::ClockSyncPing { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::DeviceConnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_online_id_is_rejected() {
        // テスト項目: オンラインの ID での接続は拒否され、オフラインなら再登録できる
        // given (前提条件):
        let (engine, _clock) = engine();
        let device = connect(&engine, "tv-1", ClientRole::Player).await;

        // when (操作):
        let (tx, _rx) = mpsc::unbounded_channel();
        let duplicate = engine
            .connect(Registration {
                client_id: Some(device.id.clone()),
                role: ClientRole::Player,
                metadata: ClientMetadata::default(),
                sender: tx.clone(),
            })
            .await;

        // then (期待する結果):
        assert_eq!(
            duplicate.unwrap_err(),
            RegisterError::DuplicateClientId("tv-1".to_string())
        );

        engine.disconnect(&device.id, device.connected_at).await;
        let again = engine
            .connect(Registration {
                client_id: Some(device.id.clone()),
                role: ClientRole::Player,
                metadata: ClientMetadata::default(),
                sender: tx,
            })
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_close_of_replaced_connection_is_ignored() {
        // テスト項目: 再登録後に古い接続が閉じても新しい接続はオフラインにならない
        // given (前提条件):
        let (engine, clock) = engine();
        let old = connect(&engine, "tv-1", ClientRole::Player).await;
        clock.advance(61_000);
        engine.run_liveness().await;
        clock.advance(1_000);
        let _new = connect(&engine, "tv-1", ClientRole::Player).await;

        // when (操作):
        engine.disconnect(&old.id, old.connected_at).await;

        // then (期待する結果):
        assert!(engine.is_connected(&old.id).await);
    }

    #[tokio::test]
    async fn test_clock_estimates_converge_through_engine() {
        // テスト項目: ping への応答で時刻推定が更新され、平均レイテンシに反映される
        // given (前提条件):
        let (engine, clock) = engine();
        let mut device = connect(&engine, "tv-1", ClientRole::Player).await;

        // when (操作): 応答に 60ms かかり、クライアントの時計は 400ms 進んでいる
        for _ in 0..3 {
            clock.advance(60);
            device.answer_probes(&engine, &clock, 400 - 30).await;
            engine.run_clock_sync().await;
        }

        // then (期待する結果):
        let client = engine.client(&device.id).await.unwrap();
        assert_eq!(client.clock_samples, 3);
        assert_eq!(client.average_latency_ms, 30.0);
        assert_eq!(client.clock_offset_ms, 400);
        assert_eq!(engine.status().await.average_latency_across_players, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_with_ready_players_and_stale_readiness() {
        // テスト項目: ready を返したプレイヤーに play が届き、古い ready は無視される
        // given (前提条件):
        let (engine, _clock) = engine();
        let mut device = connect(&engine, "tv-1", ClientRole::Player).await;
        device.drain();

        // when (操作):
        let task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .play(PlayRequest {
                        video_url: Some("http://media/a.mp4".to_string()),
                        ..Default::default()
                    })
                    .await
            })
        };
        let raw = device.rx.recv().await.unwrap();
        let ServerMessage::SyncPreload { command_id, .. } = serde_json::from_str(&raw).unwrap()
        else {
            panic!("expected sync_preload");
        };
        engine
            .handle_message(
                &device.id,
                ClientMessage::SyncReady {
                    command_id: "stale".to_string(),
                    buffer_level: 1.0,
                    video_duration: None,
                },
            )
            .await;
        assert!(!engine.client(&device.id).await.unwrap().is_ready);
        engine
            .handle_message(
                &device.id,
                ClientMessage::SyncReady {
                    command_id: command_id.clone(),
                    buffer_level: 0.8,
                    video_duration: Some(95.0),
                },
            )
            .await;
        let report = task.await.unwrap().unwrap();

        // then (期待する結果):
        assert_eq!(report.outcome, TransitionOutcome::Dispatched);
        assert_eq!(report.ready, 1);
        let client = engine.client(&device.id).await.unwrap();
        assert!(client.is_ready);
        assert_eq!(client.buffer_level, 0.8);
        assert!(matches!(device.drain()[0], ServerMessage::SyncPlay(_)));
        assert_eq!(
            engine.status().await.current_video.unwrap().duration,
            Some(95.0)
        );
    }

    #[tokio::test]
    async fn test_play_rejects_unsupported_media() {
        // テスト項目: 解決できない参照は Resolve エラー
        let (engine, _clock) = engine();

        let result = engine
            .play(PlayRequest {
                video_url: Some("ftp://media/a.mp4".to_string()),
                ..Default::default()
            })
            .await;

        assert_eq!(
            result.unwrap_err(),
            PlaybackError::Resolve(ResolveError::Unsupported("ftp://media/a.mp4".to_string()))
        );
    }

    #[tokio::test]
    async fn test_message_from_timed_out_client_revives_it() {
        // テスト項目: タイムアウト後のメッセージでオンラインに戻り、イベントが出る
        // given (前提条件):
        let (engine, clock) = engine();
        let device = connect(&engine, "tv-1", ClientRole::Player).await;
        clock.advance(60_001);
        let tick = engine.run_liveness().await;
        assert_eq!(tick.timed_out, vec![device.id.clone()]);
        let mut events = engine.subscribe();

        // when (操作):
        engine
            .handle_message(&device.id, ClientMessage::HeartbeatResponse { client_time: None })
            .await;

        // then (期待する結果):
        assert_eq!(
            engine.client(&device.id).await.unwrap().status,
            ClientStatus::Online
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::DeviceStatusChanged {
                current: ClientStatus::Online,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_beyond_threshold_triggers_realign() {
        // テスト項目: auto_realign 有効時、しきい値を超えるずれで seek が発行される
        // given (前提条件):
        let config = SyncConfig {
            auto_realign: true,
            ..SyncConfig::default()
        };
        let (engine, clock) = engine_with(config);
        let mut a = connect(&engine, "tv-a", ClientRole::Player).await;
        let mut b = connect(&engine, "tv-b", ClientRole::Player).await;
        clock.advance(20);
        a.answer_probes(&engine, &clock, 0).await;
        b.answer_probes(&engine, &clock, 0).await;
        engine
            .play(PlayRequest {
                video_url: Some("http://media/a.mp4".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        clock.advance(12_000);
        let Ok((check_id, 2)) = engine.run_drift_check().await.sent else {
            panic!("check was not sent");
        };
        a.drain();
        b.drain();

        // when (操作): B が 800ms 遅れている
        let now = clock.now_millis();
        for (device, position) in [(&a, 10.0), (&b, 9.2)] {
            engine
                .handle_message(
                    &device.id,
                    ClientMessage::PositionReport {
                        check_id: check_id.to_string(),
                        position,
                        client_time: Some(now),
                        video_url: None,
                        duration: None,
                    },
                )
                .await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        // then (期待する結果): 両方に seek 用の preload が届く
        assert!(matches!(a.drain()[0], ServerMessage::SyncPreload { .. }));
        assert!(matches!(b.drain()[0], ServerMessage::SyncPreload { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loops_run_and_stop() {
        // テスト項目: start で heartbeat が定期送信され、shutdown で止まる
        // given (前提条件):
        let (engine, _clock) = engine();
        let mut device = connect(&engine, "tv-1", ClientRole::Player).await;
        device.drain();

        // when (操作):
        engine.start().await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        // then (期待する結果):
        let messages = device.drain();
        assert!(
            messages
                .iter()
                .any(|message| matches!(message, ServerMessage::Heartbeat { .. }))
        );

        engine.shutdown().await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(device.drain().is_empty());
    }
}
