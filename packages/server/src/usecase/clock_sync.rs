//! UseCase: clock synchronization
//!
//! Sends `clock_sync_ping` probes and folds each echoed response into the
//! client's latency and offset estimates. Outstanding probes are keyed by ping
//! id so a response is always matched against the instant the server sent it.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use lockstep_shared::time::Clock;

use crate::{
    domain::{Client, ClientId, ClockSample, MessagePushError, PingId, Timestamp},
    infrastructure::dto::websocket::ServerMessage,
};

use super::client_registry::ClientRegistry;

#[derive(Debug, Clone)]
struct PendingProbe {
    client_id: ClientId,
    sent_at: Timestamp,
}

pub struct ClockSynchronizer {
    registry: Arc<ClientRegistry>,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<PingId, PendingProbe>>,
    /// Probes older than this are forgotten
    probe_ttl_ms: i64,
}

impl ClockSynchronizer {
    pub fn new(registry: Arc<ClientRegistry>, clock: Arc<dyn Clock>, probe_ttl_ms: i64) -> Self {
        Self {
            registry,
            clock,
            pending: Mutex::new(HashMap::new()),
            probe_ttl_ms,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// Send one probe to `client_id`
    pub async fn probe(&self, client_id: &ClientId) -> Result<PingId, MessagePushError> {
        let ping_id = PingId::generate();
        let sent_at = self.now();
        self.pending.lock().await.insert(
            ping_id.clone(),
            PendingProbe {
                client_id: client_id.clone(),
                sent_at,
            },
        );

        let ping = ServerMessage::ClockSyncPing {
            server_time: sent_at.value(),
            ping_id: ping_id.to_string(),
        };
        if let Err(e) = self.registry.send(client_id, &ping).await {
            self.pending.lock().await.remove(&ping_id);
            return Err(e);
        }
        Ok(ping_id)
    }

    /// Probe every online client. Returns how many probes were sent.
    pub async fn probe_all(&self) -> usize {
        self.forget_expired().await;

        let mut sent = 0;
        for client in self.registry.online().await {
            if self.probe(&client.id).await.is_ok() {
                sent += 1;
            }
        }
        tracing::debug!("Clock sync round: {} probe(s) sent", sent);
        sent
    }

    /// Fold a `clock_sync_response` into the client's estimates.
    ///
    /// `echoed_server_time` is only trusted when the ping id is unknown (e.g.
    /// after a restart) and the echo is recent.
    pub async fn handle_response(
        &self,
        client_id: &ClientId,
        ping_id: &PingId,
        echoed_server_time: i64,
        client_time: i64,
    ) -> Option<Client> {
        let received_at = self.now();
        let pending = self.pending.lock().await.remove(ping_id);

        let sent_at = match pending {
            Some(probe) if &probe.client_id == client_id => probe.sent_at,
            Some(probe) => {
                tracing::warn!(
                    "Ping {} was sent to {} but answered by {}",
                    ping_id,
                    probe.client_id,
                    client_id
                );
                return None;
            }
            None => {
                let echoed = Timestamp::new(echoed_server_time);
                let age = received_at.millis_since(echoed);
                if !(0..=self.probe_ttl_ms).contains(&age) {
                    tracing::debug!("Ignoring stale clock response {} from {}", ping_id, client_id);
                    return None;
                }
                echoed
            }
        };

        let sample = ClockSample::from_probe(sent_at, client_time, received_at);
        match self.registry.record_clock_sample(client_id, sample).await {
            Ok(client) => {
                tracing::debug!(
                    "Clock sample from {}: latency={:.1}ms offset={}ms (avg latency {:.1}ms)",
                    client_id,
                    sample.latency_ms,
                    sample.offset_ms,
                    client.average_latency_ms
                );
                Some(client)
            }
            Err(e) => {
                tracing::debug!("Dropping clock sample: {}", e);
                None
            }
        }
    }

    async fn forget_expired(&self) {
        let cutoff = self.now().plus_millis(-self.probe_ttl_ms);
        self.pending
            .lock()
            .await
            .retain(|_, probe| probe.sent_at >= cutoff);
    }

    pub async fn pending_probes(&self) -> usize {
        self.pending.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ClientMetadata, ClientRole, EngineEvent},
        infrastructure::{
            message_pusher::WebSocketMessagePusher, repository::InMemoryClientRepository,
        },
        usecase::{
            client_registry::Registration, readiness::ReadinessTracker, sync_state::SyncStateStore,
        },
    };
    use lockstep_shared::time::ManualClock;
    use tokio::sync::{broadcast, mpsc};

    struct Fixture {
        sync: ClockSynchronizer,
        registry: Arc<ClientRegistry>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(10_000_000));
        let (events, _) = broadcast::channel::<EngineEvent>(16);
        let state = Arc::new(SyncStateStore::new(events.clone(), clock.clone()));
        let registry = Arc::new(ClientRegistry::new(
            Arc::new(InMemoryClientRepository::new()),
            Arc::new(WebSocketMessagePusher::new()),
            Arc::new(ReadinessTracker::new()),
            state,
            events,
            clock.clone(),
        ));
        let sync = ClockSynchronizer::new(registry.clone(), clock.clone(), 30_000);
        Fixture {
            sync,
            registry,
            clock,
        }
    }

    async fn connect(f: &Fixture, id: &str) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = f
            .registry
            .register(Registration {
                client_id: Some(ClientId::new(id.to_string()).unwrap()),
                role: ClientRole::Player,
                metadata: ClientMetadata::default(),
                sender: tx,
            })
            .await;
        // device_registered
        rx.recv().await.unwrap();
        (client.id, rx)
    }

    async fn next_ping(rx: &mut mpsc::UnboundedReceiver<String>) -> (PingId, i64) {
        let raw = rx.recv().await.unwrap();
        match serde_json::from_str::<ServerMessage>(&raw).unwrap() {
            ServerMessage::ClockSyncPing {
                server_time,
                ping_id,
            } => (PingId::from(ping_id), server_time),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_estimates_converge_on_stable_link() {
        // テスト項目: 片道 40ms、時計が 250ms 進んでいるクライアントの推定が収束する
        // given (前提条件):
        let f = fixture();
        let (id, mut rx) = connect(&f, "tv-1").await;

        // when (操作): 5 回の往復をシミュレート
        let mut last = None;
        for _ in 0..5 {
            f.sync.probe(&id).await.unwrap();
            let (ping_id, server_time) = next_ping(&mut rx).await;
            f.clock.advance(40);
            let client_time = f.clock.now_millis() + 250;
            f.clock.advance(40);
            last = f
                .sync
                .handle_response(&id, &ping_id, server_time, client_time)
                .await;
        }

        // then (期待する結果):
        let client = last.unwrap();
        assert_eq!(client.clock_samples, 5);
        assert!((client.average_latency_ms - 40.0).abs() < 1.0);
        assert!((client.clock_offset_ms - 250).abs() <= 1);
        assert_eq!(f.sync.pending_probes().await, 0);
    }

    #[tokio::test]
    async fn test_response_from_wrong_client_is_ignored() {
        // テスト項目: 別のクライアントに送った ping への応答は無視される
        // given (前提条件):
        let f = fixture();
        let (a, mut rx_a) = connect(&f, "tv-a").await;
        let (b, _rx_b) = connect(&f, "tv-b").await;
        f.sync.probe(&a).await.unwrap();
        let (ping_id, server_time) = next_ping(&mut rx_a).await;

        // when (操作):
        let result = f
            .sync
            .handle_response(&b, &ping_id, server_time, server_time)
            .await;

        // then (期待する結果):
        assert!(result.is_none());
        assert_eq!(f.registry.get(&b).await.unwrap().clock_samples, 0);
    }

    #[tokio::test]
    async fn test_unknown_ping_uses_recent_echo_only() {
        // テスト項目: 未知の ping id は、最近の serverTime エコーであれば採用される
        // given (前提条件):
        let f = fixture();
        let (id, _rx) = connect(&f, "tv-1").await;
        let now = f.clock.now_millis();

        // when (操作):
        let recent = f
            .sync
            .handle_response(&id, &PingId::from("unknown"), now - 60, now - 90)
            .await;
        let stale = f
            .sync
            .handle_response(&id, &PingId::from("unknown"), now - 120_000, now)
            .await;

        // then (期待する結果):
        let client = recent.unwrap();
        assert_eq!(client.average_latency_ms, 30.0);
        assert_eq!(client.clock_offset_ms, -60);
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn test_garbage_client_time_is_absorbed() {
        // テスト項目: 極端な clientTime を返すクライアントでも期限計算がパニックしない
        // given (前提条件):
        let f = fixture();
        let (id, _rx) = connect(&f, "tv-1").await;
        let ping_id = f.sync.probe(&id).await.unwrap();
        f.clock.advance(40);

        // when (操作):
        let client = f
            .sync
            .handle_response(&id, &ping_id, 0, i64::MIN)
            .await
            .unwrap();
        let scheduled = f.clock.now_millis() + 2_000;
        let deadline = crate::domain::timing::adjusted_scheduled_time(
            Timestamp::new(scheduled),
            client.clock_offset_ms,
            client.average_latency_ms,
        );

        // then (期待する結果):
        assert_eq!(client.clock_offset_ms, i64::MIN);
        assert_eq!(deadline.value(), scheduled + i64::MIN);
    }

    #[tokio::test]
    async fn test_probe_all_skips_offline_clients() {
        // テスト項目: probe_all はオンラインのクライアントにだけ送る
        let f = fixture();
        let (_a, _rx_a) = connect(&f, "tv-a").await;
        let (b, _rx_b) = connect(&f, "tv-b").await;
        f.registry.unregister(&b).await;

        assert_eq!(f.sync.probe_all().await, 1);
    }
}
