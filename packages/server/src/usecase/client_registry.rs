//! UseCase: クライアント台帳
//!
//! 接続中のデバイスの登録・削除・検索と、デバイスへのメッセージ送信を担当します。
//! 送信に失敗したクライアントはその場で Error 状態に落とし、以降のブロードキャスト
//! 対象から外します。プレイヤーの集合が変わるたびに平均レイテンシを再計算します。
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - register / unregister / touch / send の状態遷移とイベント
//!
//! ### なぜこのテストが必要か
//! - 再接続時に新しい状態から始まること、送信失敗で Error 状態になることを保証
//!
//! ### どのような状況を想定しているか
//! - 正常系：登録、名前の自動割り当て
//! - 異常系：送信失敗、未知のクライアント
//! - エッジケース：オフラインからの復帰

use std::sync::Arc;

use tokio::sync::broadcast;

use lockstep_shared::time::Clock;

use crate::{
    domain::{
        Client, ClientId, ClientMetadata, ClientRepository, ClientRole,
        ClientStatus, ClockSample, CommandId, DisconnectReason, EngineEvent, MessagePushError,
        MessagePusher, PusherChannel, RepositoryError, Timestamp, VideoReport,
        timing::average_latency,
    },
    infrastructure::dto::websocket::ServerMessage,
};

use super::{readiness::ReadinessTracker, sync_state::SyncStateStore};

/// Everything known about a connection at registration time
#[derive(Debug)]
pub struct Registration {
    /// Stable id supplied by the device; generated when absent
    pub client_id: Option<ClientId>,
    pub role: ClientRole,
    pub metadata: ClientMetadata,
    pub sender: PusherChannel,
}

pub struct ClientRegistry {
    repository: Arc<dyn ClientRepository>,
    message_pusher: Arc<dyn MessagePusher>,
    readiness: Arc<ReadinessTracker>,
    state: Arc<SyncStateStore>,
    events: broadcast::Sender<EngineEvent>,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    pub fn new(
        repository: Arc<dyn ClientRepository>,
        message_pusher: Arc<dyn MessagePusher>,
        readiness: Arc<ReadinessTracker>,
        state: Arc<SyncStateStore>,
        events: broadcast::Sender<EngineEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            message_pusher,
            readiness,
            state,
            events,
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// クライアントを登録し、`device_registered` を送信
    ///
    /// 同じ ID の記録が残っていれば置き換えます（時刻推定と ready 状態は初期化、
    /// 割り当て済みの名前は引き継ぎ）。重複接続の拒否は呼び出し側の責務です。
    pub async fn register(&self, registration: Registration) -> Client {
        let Registration {
            client_id,
            role,
            metadata,
            sender,
        } = registration;
        let client_id = client_id.unwrap_or_else(ClientId::generate);
        let now = self.now();

        let assigned_name = match self.repository.get(&client_id).await {
            Some(previous) => previous.assigned_name,
            None => match metadata.requested_name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => self.default_name(role).await,
            },
        };

        let client = Client::new(client_id.clone(), role, assigned_name, metadata, now);
        self.repository.insert(client.clone()).await;
        self.message_pusher
            .register_client(client_id.clone(), sender)
            .await;

        tracing::info!(
            "Client registered: {} ({}, {})",
            client_id,
            role,
            client.assigned_name
        );
        let _ = self.events.send(EngineEvent::DeviceConnected {
            client_id: client_id.clone(),
            role,
            assigned_name: client.assigned_name.clone(),
            at: now,
        });

        let registered = ServerMessage::DeviceRegistered {
            device_id: client_id.to_string(),
            assigned_name: client.assigned_name.clone(),
            server_time: now.value(),
        };
        let _ = self.send(&client_id, &registered).await;

        if role.is_player() {
            self.recompute_average_latency().await;
        }
        client
    }

    async fn default_name(&self, role: ClientRole) -> String {
        let existing = self.repository.list_by_role(role).await.len();
        let label = match role {
            ClientRole::Player => "Player",
            ClientRole::Admin => "Admin",
            ClientRole::Singer => "Singer",
        };
        format!("{} {}", label, existing + 1)
    }

    /// 接続が閉じたクライアントをオフラインにする
    pub async fn unregister(&self, client_id: &ClientId) -> Option<Client> {
        self.mark_offline(client_id, DisconnectReason::Closed).await;
        self.repository.get(client_id).await
    }

    /// クライアントをオフライン（送信失敗時は Error）に遷移させる
    ///
    /// タイムアウトの場合は送信チャンネルを残し、遅れて届いたメッセージで復帰できるようにします。
    /// どの理由でも、進行中の readiness 待ちからは外します。
    pub async fn mark_offline(&self, client_id: &ClientId, reason: DisconnectReason) -> bool {
        let status = match reason {
            DisconnectReason::SendFailed => ClientStatus::Error,
            DisconnectReason::Closed | DisconnectReason::Timeout => ClientStatus::Offline,
        };
        let now = self.now();

        let previous = match self.repository.set_status(client_id, status, now).await {
            Ok(previous) => previous,
            Err(e) => {
                tracing::debug!("Ignoring disconnect of unknown client {}: {}", client_id, e);
                return false;
            }
        };

        if reason != DisconnectReason::Timeout {
            self.message_pusher.unregister_client(client_id).await;
        }
        self.readiness.remove_client(client_id).await;
        if previous != ClientStatus::Online {
            return false;
        }

        tracing::info!("Client {} went {:?} ({:?})", client_id, status, reason);
        let _ = self.events.send(EngineEvent::DeviceDisconnected {
            client_id: client_id.clone(),
            reason,
            at: now,
        });
        self.recompute_average_latency().await;
        true
    }

    /// 猶予期間を過ぎたクライアントを台帳から削除
    pub async fn purge(&self, client_id: &ClientId) -> Option<Client> {
        self.message_pusher.unregister_client(client_id).await;
        let removed = self.repository.remove(client_id).await;
        if removed.is_some() {
            tracing::info!("Client purged: {}", client_id);
        }
        removed
    }

    /// 受信したメッセージをアクティビティとして記録し、必要ならオンラインに復帰させる
    pub async fn touch(&self, client_id: &ClientId) -> Result<(), RepositoryError> {
        let now = self.now();
        if let Some(previous) = self.repository.touch(client_id, now).await? {
            tracing::info!("Client {} is back online (was {:?})", client_id, previous);
            let _ = self.events.send(EngineEvent::DeviceStatusChanged {
                client_id: client_id.clone(),
                previous,
                current: ClientStatus::Online,
                at: now,
            });
            self.recompute_average_latency().await;
        }
        Ok(())
    }

    pub async fn get(&self, client_id: &ClientId) -> Option<Client> {
        self.repository.get(client_id).await
    }

    pub async fn list(&self) -> Vec<Client> {
        self.repository.list().await
    }

    pub async fn list_by_role(&self, role: ClientRole) -> Vec<Client> {
        self.repository.list_by_role(role).await
    }

    pub async fn is_online(&self, client_id: &ClientId) -> bool {
        self.repository
            .get(client_id)
            .await
            .is_some_and(|client| client.is_online())
    }

    /// オンラインの全クライアント
    pub async fn online(&self) -> Vec<Client> {
        self.repository
            .list()
            .await
            .into_iter()
            .filter(Client::is_online)
            .collect()
    }

    /// 再生に参加するクライアント（オンラインのプレイヤー）
    pub async fn online_players(&self) -> Vec<Client> {
        self.repository
            .list_by_role(ClientRole::Player)
            .await
            .into_iter()
            .filter(Client::is_online)
            .collect()
    }

    pub async fn record_clock_sample(
        &self,
        client_id: &ClientId,
        sample: ClockSample,
    ) -> Result<Client, RepositoryError> {
        let client = self.repository.record_clock_sample(client_id, sample).await?;
        if client.participates_in_playback() {
            self.recompute_average_latency().await;
        }
        Ok(client)
    }

    pub async fn reset_readiness(&self, client_ids: &[ClientId]) {
        self.repository.reset_readiness(client_ids).await;
    }

    pub async fn mark_ready(
        &self,
        client_id: &ClientId,
        command_id: CommandId,
        buffer_level: f64,
    ) -> Result<(), RepositoryError> {
        self.repository
            .mark_ready(client_id, command_id, buffer_level)
            .await
    }

    pub async fn update_report(
        &self,
        client_id: &ClientId,
        buffer_level: Option<f64>,
        video: Option<VideoReport>,
    ) -> Result<(), RepositoryError> {
        self.repository
            .update_report(client_id, buffer_level, video)
            .await
    }

    /// 1 クライアントに送信。失敗したクライアントは Error 状態にする
    pub async fn send(
        &self,
        client_id: &ClientId,
        message: &ServerMessage,
    ) -> Result<(), MessagePushError> {
        let content = encode(message)?;
        match self.message_pusher.push_to(client_id, &content).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Failed to send to {}: {}", client_id, e);
                self.mark_offline(client_id, DisconnectReason::SendFailed)
                    .await;
                Err(e)
            }
        }
    }

    /// 複数クライアントに同じメッセージを送信し、失敗したクライアントを返す
    pub async fn broadcast(&self, targets: Vec<ClientId>, message: &ServerMessage) -> Vec<ClientId> {
        let content = match encode(message) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Failed to encode broadcast: {}", e);
                return targets;
            }
        };
        let failed = self.message_pusher.broadcast(targets, &content).await;
        for client_id in &failed {
            tracing::warn!("Failed to broadcast to {}", client_id);
            self.mark_offline(client_id, DisconnectReason::SendFailed)
                .await;
        }
        failed
    }

    /// オンラインのプレイヤーから平均レイテンシを再計算
    pub async fn recompute_average_latency(&self) -> f64 {
        let players = self.online_players().await;
        let average = average_latency(players.iter().map(|client| client.average_latency_ms));
        self.state.set_average_latency(average).await;
        average
    }
}

fn encode(message: &ServerMessage) -> Result<String, MessagePushError> {
    serde_json::to_string(message).map_err(|e| MessagePushError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MockMessagePusher,
        infrastructure::{
            message_pusher::WebSocketMessagePusher, repository::InMemoryClientRepository,
        },
    };
    use lockstep_shared::time::ManualClock;
    use tokio::sync::mpsc;

    struct Fixture {
        registry: ClientRegistry,
        repository: Arc<InMemoryClientRepository>,
        readiness: Arc<ReadinessTracker>,
        state: Arc<SyncStateStore>,
        events: broadcast::Receiver<EngineEvent>,
        clock: Arc<ManualClock>,
    }

    fn fixture_with_pusher(message_pusher: Arc<dyn MessagePusher>) -> Fixture {
        let repository = Arc::new(InMemoryClientRepository::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let (events_tx, events) = broadcast::channel(64);
        let state = Arc::new(SyncStateStore::new(events_tx.clone(), clock.clone()));
        let readiness = Arc::new(ReadinessTracker::new());
        let registry = ClientRegistry::new(
            repository.clone(),
            message_pusher,
            readiness.clone(),
            state.clone(),
            events_tx,
            clock.clone(),
        );
        Fixture {
            registry,
            repository,
            readiness,
            state,
            events,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_pusher(Arc::new(WebSocketMessagePusher::new()))
    }

    fn registration(
        id: Option<&str>,
        role: ClientRole,
    ) -> (Registration, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Registration {
                client_id: id.map(|id| ClientId::new(id.to_string()).unwrap()),
                role,
                metadata: ClientMetadata::default(),
                sender: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_register_sends_device_registered() {
        // テスト項目: 登録で device_registered が送られ、イベントが発行される
        // given (前提条件):
        let mut f = fixture();
        let (reg, mut rx) = registration(Some("tv-1"), ClientRole::Player);

        // when (操作):
        let client = f.registry.register(reg).await;

        // then (期待する結果):
        assert_eq!(client.assigned_name, "Player 1");
        let raw = rx.recv().await.unwrap();
        let msg: ServerMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            msg,
            ServerMessage::DeviceRegistered {
                device_id: "tv-1".to_string(),
                assigned_name: "Player 1".to_string(),
                server_time: 1_000_000,
            }
        );
        assert!(matches!(
            f.events.recv().await.unwrap(),
            EngineEvent::DeviceConnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_register_without_id_generates_one() {
        // テスト項目: ID なしの登録では ID が生成される
        let f = fixture();
        let (reg, _rx) = registration(None, ClientRole::Admin);

        let client = f.registry.register(reg).await;

        assert!(!client.id.as_str().is_empty());
        assert_eq!(client.assigned_name, "Admin 1");
        assert!(f.repository.get(&client.id).await.is_some());
    }

    #[tokio::test]
    async fn test_reregistration_resets_estimates_and_keeps_name() {
        // テスト項目: 再登録で時刻推定が初期化され、名前は引き継がれる
        // given (前提条件):
        let f = fixture();
        let (reg, _rx1) = registration(Some("tv-1"), ClientRole::Player);
        let client = f.registry.register(reg).await;
        f.registry
            .record_clock_sample(
                &client.id,
                ClockSample {
                    latency_ms: 40.0,
                    offset_ms: 120,
                },
            )
            .await
            .unwrap();
        f.registry.unregister(&client.id).await;

        // when (操作):
        let (reg, _rx2) = registration(Some("tv-1"), ClientRole::Player);
        let again = f.registry.register(reg).await;

        // then (期待する結果):
        assert_eq!(again.assigned_name, client.assigned_name);
        assert_eq!(again.clock_samples, 0);
        assert_eq!(again.clock_offset_ms, 0);
        assert!(again.is_online());
    }

    #[tokio::test]
    async fn test_aggregate_latency_tracks_online_players() {
        // テスト項目: 平均レイテンシはオンラインのプレイヤーだけから計算される
        // given (前提条件):
        let f = fixture();
        let (a, _rx_a) = registration(Some("tv-a"), ClientRole::Player);
        let (b, _rx_b) = registration(Some("tv-b"), ClientRole::Player);
        let (admin, _rx_admin) = registration(Some("panel"), ClientRole::Admin);
        let a = f.registry.register(a).await;
        let b = f.registry.register(b).await;
        let admin = f.registry.register(admin).await;

        // when (操作):
        for (id, latency) in [(&a.id, 20.0), (&b.id, 80.0), (&admin.id, 500.0)] {
            f.registry
                .record_clock_sample(
                    id,
                    ClockSample {
                        latency_ms: latency,
                        offset_ms: 0,
                    },
                )
                .await
                .unwrap();
        }

        // then (期待する結果):
        assert_eq!(f.state.average_latency().await, 50.0);

        f.registry.unregister(&b.id).await;
        assert_eq!(f.state.average_latency().await, 20.0);
    }

    #[tokio::test]
    async fn test_send_failure_marks_client_error() {
        // テスト項目: 送信に失敗したクライアントは Error 状態になる
        // given (前提条件):
        let mut pusher = MockMessagePusher::new();
        pusher.expect_register_client().returning(|_, _| ());
        pusher.expect_unregister_client().times(1).returning(|_| ());
        pusher
            .expect_push_to()
            .returning(|id, _| Err(MessagePushError::PushFailed(id.to_string())));
        let mut f = fixture_with_pusher(Arc::new(pusher));
        let (reg, _rx) = registration(Some("tv-1"), ClientRole::Player);

        // when (操作): 登録時の device_registered 送信が失敗する
        let client = f.registry.register(reg).await;

        // then (期待する結果):
        let stored = f.repository.get(&client.id).await.unwrap();
        assert_eq!(stored.status, ClientStatus::Error);
        assert!(matches!(
            f.events.recv().await.unwrap(),
            EngineEvent::DeviceConnected { .. }
        ));
        assert!(matches!(
            f.events.recv().await.unwrap(),
            EngineEvent::DeviceDisconnected {
                reason: DisconnectReason::SendFailed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_send_failure_releases_readiness_wait() {
        // テスト項目: readiness 待ち中のクライアントへの送信が失敗したら、待ち対象から外れる
        // given (前提条件):
        let f = fixture();
        let (reg, rx) = registration(Some("tv-1"), ClientRole::Player);
        let client = f.registry.register(reg).await;
        let command_id = CommandId::generate();
        f.readiness
            .begin(command_id.clone(), std::slice::from_ref(&client.id))
            .await;
        assert_eq!(f.readiness.pending_count().await, 1);
        drop(rx);

        // when (操作): 時刻同期などプリロード以外の送信で失敗する
        let result = f
            .registry
            .send(&client.id, &ServerMessage::Heartbeat { server_time: 0 })
            .await;

        // then (期待する結果):
        assert!(result.is_err());
        assert_eq!(f.readiness.pending_count().await, 0);
        assert_eq!(
            f.readiness
                .wait(&command_id, std::time::Duration::from_secs(5))
                .await,
            crate::usecase::readiness::ReadinessOutcome::AllReady
        );
    }

    #[tokio::test]
    async fn test_touch_revives_timed_out_client() {
        // テスト項目: タイムアウトでオフラインになったクライアントがメッセージで復帰する
        // given (前提条件):
        let f = fixture();
        let (reg, _rx) = registration(Some("tv-1"), ClientRole::Player);
        let client = f.registry.register(reg).await;
        f.registry
            .mark_offline(&client.id, DisconnectReason::Timeout)
            .await;
        assert!(!f.registry.is_online(&client.id).await);

        // when (操作):
        f.clock.advance(1_000);
        f.registry.touch(&client.id).await.unwrap();

        // then (期待する結果):
        let stored = f.registry.get(&client.id).await.unwrap();
        assert!(stored.is_online());
        assert_eq!(stored.last_activity, Timestamp::new(1_001_000));
    }

    #[tokio::test]
    async fn test_touch_unknown_client_is_error() {
        // テスト項目: 未知のクライアントの touch はエラー
        let f = fixture();
        let id = ClientId::new("ghost".to_string()).unwrap();

        assert_eq!(
            f.registry.touch(&id).await,
            Err(RepositoryError::ClientNotFound("ghost".to_string()))
        );
    }
}
