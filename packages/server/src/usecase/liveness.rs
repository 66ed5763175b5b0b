//! UseCase: liveness
//!
//! 定期的に heartbeat を送り、最後のメッセージから activity timeout を過ぎた
//! クライアントをオフラインにします。オフラインのまま purge grace を過ぎた
//! クライアントは台帳から削除します。

use std::sync::Arc;

use lockstep_shared::time::Clock;

use crate::{
    domain::{ClientId, DisconnectReason, Timestamp},
    infrastructure::dto::websocket::ServerMessage,
};

use super::client_registry::ClientRegistry;

/// What one liveness tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LivenessTick {
    pub heartbeats: usize,
    pub timed_out: Vec<ClientId>,
    pub purged: Vec<ClientId>,
}

pub struct LivenessMonitor {
    registry: Arc<ClientRegistry>,
    clock: Arc<dyn Clock>,
    activity_timeout_ms: i64,
    purge_grace_ms: i64,
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<ClientRegistry>,
        clock: Arc<dyn Clock>,
        activity_timeout_ms: i64,
        purge_grace_ms: i64,
    ) -> Self {
        Self {
            registry,
            clock,
            activity_timeout_ms,
            purge_grace_ms,
        }
    }

    pub async fn tick(&self) -> LivenessTick {
        let now = Timestamp::new(self.clock.now_millis());
        let mut result = LivenessTick::default();

        let online = self.registry.online().await;
        let targets: Vec<ClientId> = online.iter().map(|client| client.id.clone()).collect();
        let failed = self
            .registry
            .broadcast(
                targets.clone(),
                &ServerMessage::Heartbeat {
                    server_time: now.value(),
                },
            )
            .await;
        result.heartbeats = targets.len() - failed.len();

        for client in online {
            if failed.contains(&client.id) {
                continue;
            }
            if now.millis_since(client.last_activity) > self.activity_timeout_ms {
                tracing::info!(
                    "Client {} inactive for {}ms; marking offline",
                    client.id,
                    now.millis_since(client.last_activity)
                );
                if self
                    .registry
                    .mark_offline(&client.id, DisconnectReason::Timeout)
                    .await
                {
                    result.timed_out.push(client.id);
                }
            }
        }

        for client in self.registry.list().await {
            if client.is_purgeable(now, self.purge_grace_ms)
                && self.registry.purge(&client.id).await.is_some()
            {
                result.purged.push(client.id);
            }
        }

        result
    }
}
