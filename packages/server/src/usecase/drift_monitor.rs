//! UseCase: drift monitoring
//!
//! 再生中は定期的に `sync_check_position` を送り、返ってきた位置を共通のサーバー時刻に
//! 補正して比較します。オンラインで時刻同期済みのプレイヤーが 2 台未満のときは何も送りません。
//! 応答は直近のチェック ID に対するものだけを受け付けます。

use std::{collections::HashSet, sync::Arc};

use tokio::sync::{Mutex, broadcast};

use lockstep_shared::time::Clock;

use crate::{
    domain::{
        CheckId, ClientId, DriftAssessment, EngineEvent, PositionSample, Timestamp, assess_drift,
    },
    infrastructure::dto::websocket::ServerMessage,
};

use super::{client_registry::ClientRegistry, sync_state::SyncStateStore};

/// Why a tick sent nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPlaying,
    NotEnoughSyncedPlayers(usize),
}

/// What one drift tick did
#[derive(Debug, Clone, PartialEq)]
pub struct DriftTick {
    /// Assessment of the previous check, if it collected enough reports
    pub evaluated: Option<DriftAssessment>,
    pub sent: Result<(CheckId, usize), SkipReason>,
}

#[derive(Debug)]
struct OpenCheck {
    check_id: CheckId,
    awaiting: HashSet<ClientId>,
    samples: Vec<PositionSample>,
}

pub struct DriftMonitor {
    registry: Arc<ClientRegistry>,
    state: Arc<SyncStateStore>,
    events: broadcast::Sender<EngineEvent>,
    clock: Arc<dyn Clock>,
    tolerance_ms: u64,
    current: Mutex<Option<OpenCheck>>,
}

impl DriftMonitor {
    pub fn new(
        registry: Arc<ClientRegistry>,
        state: Arc<SyncStateStore>,
        events: broadcast::Sender<EngineEvent>,
        clock: Arc<dyn Clock>,
        tolerance_ms: u64,
    ) -> Self {
        Self {
            registry,
            state,
            events,
            clock,
            tolerance_ms,
            current: Mutex::new(None),
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// 前回のチェックを締め、条件を満たせば新しいチェックを送信
    pub async fn tick(&self) -> DriftTick {
        let previous = self.current.lock().await.take();
        let evaluated = match previous {
            Some(check) if check.samples.len() >= 2 => Some(self.evaluate(check).await),
            Some(check) => {
                tracing::debug!(
                    "Drift check {} closed with {} report(s)",
                    check.check_id,
                    check.samples.len()
                );
                None
            }
            None => None,
        };

        DriftTick {
            evaluated,
            sent: self.open_check().await,
        }
    }

    async fn open_check(&self) -> Result<(CheckId, usize), SkipReason> {
        if !self.state.snapshot().await.is_playing {
            return Err(SkipReason::NotPlaying);
        }

        let players = self.registry.online_players().await;
        let synced = players
            .iter()
            .filter(|client| client.is_clock_synced())
            .count();
        if synced < 2 {
            return Err(SkipReason::NotEnoughSyncedPlayers(synced));
        }

        let check_id = CheckId::generate();
        let targets: Vec<ClientId> = players.into_iter().map(|client| client.id).collect();
        // 応答を待つ前に登録しておく
        *self.current.lock().await = Some(OpenCheck {
            check_id: check_id.clone(),
            awaiting: targets.iter().cloned().collect(),
            samples: Vec::new(),
        });

        let message = ServerMessage::SyncCheckPosition {
            check_id: check_id.to_string(),
        };
        let failed = self.registry.broadcast(targets.clone(), &message).await;

        let mut current = self.current.lock().await;
        if let Some(check) = current.as_mut().filter(|check| check.check_id == check_id) {
            for client_id in &failed {
                check.awaiting.remove(client_id);
            }
        }
        let sent = targets.len() - failed.len();
        tracing::debug!("Drift check {} sent to {} player(s)", check_id, sent);
        Ok((check_id, sent))
    }

    /// `position_report` を記録。全員分が揃ったら評価結果を返す
    pub async fn handle_report(
        &self,
        client_id: &ClientId,
        check_id: &CheckId,
        position: f64,
        client_time: Option<i64>,
    ) -> Option<DriftAssessment> {
        let client = self.registry.get(client_id).await?;
        let now = self.now();
        let captured_at = match client_time {
            Some(client_time) if client.is_clock_synced() => {
                Timestamp::new(client_time.saturating_sub(client.clock_offset_ms))
            }
            _ => now.plus_millis(-(client.average_latency_ms.round() as i64)),
        };

        let complete = {
            let mut current = self.current.lock().await;
            let Some(check) = current.as_mut() else {
                tracing::debug!("Ignoring position report for closed check {}", check_id);
                return None;
            };
            if &check.check_id != check_id || !check.awaiting.remove(client_id) {
                tracing::debug!(
                    "Ignoring stale position report {} from {}",
                    check_id,
                    client_id
                );
                return None;
            }
            check.samples.push(PositionSample {
                client_id: client_id.clone(),
                position,
                captured_at,
            });
            if check.awaiting.is_empty() {
                current.take()
            } else {
                None
            }
        };

        match complete {
            Some(check) => Some(self.evaluate(check).await),
            None => None,
        }
    }

    async fn evaluate(&self, check: OpenCheck) -> DriftAssessment {
        let evaluated_at = self.now();
        let state = self.state.snapshot().await;
        let assessment = assess_drift(
            &check.samples,
            evaluated_at,
            state.is_playing,
            state.expected_position_at(evaluated_at),
            self.tolerance_ms,
        );

        if assessment.within_tolerance {
            tracing::debug!(
                "Drift check {}: skew {}ms across {} player(s)",
                check.check_id,
                assessment.max_skew_ms,
                assessment.clients.len()
            );
        } else {
            tracing::warn!(
                "Drift check {}: skew {}ms exceeds tolerance {}ms",
                check.check_id,
                assessment.max_skew_ms,
                self.tolerance_ms
            );
        }

        let _ = self.events.send(EngineEvent::DriftReport {
            check_id: check.check_id,
            assessment: assessment.clone(),
        });
        assessment
    }
}
