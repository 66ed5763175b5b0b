//! Readiness tracking for the outstanding transition
//!
//! 直近に発行したコマンドの ID と、まだ `sync_ready` を返していないクライアントの集合を
//! 保持します。新しいコマンドを `begin` すると、前のコマンドの待機は `Superseded` で
//! 終了します。待機は watch チャンネルで起こされるため、ポーリング間隔による遅延はありません。

use std::{collections::HashSet, time::Duration};

use tokio::{
    sync::{Mutex, watch},
    time::Instant,
};

use crate::domain::{ClientId, CommandId};

/// How a readiness wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// Every target reported ready (or left)
    AllReady,
    /// The deadline passed with `pending` targets still outstanding
    TimedOut { pending: usize },
    /// A newer command replaced this one
    Superseded,
}

#[derive(Debug, Default)]
struct Outstanding {
    command_id: Option<CommandId>,
    pending: HashSet<ClientId>,
    /// First media duration reported for the command
    duration: Option<f64>,
}

pub struct ReadinessTracker {
    outstanding: Mutex<Outstanding>,
    changed: watch::Sender<u64>,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            outstanding: Mutex::new(Outstanding::default()),
            changed,
        }
    }

    /// Make `command_id` the outstanding command, waiting on `targets`.
    ///
    /// Returns the command that was superseded, if any.
    pub async fn begin(&self, command_id: CommandId, targets: &[ClientId]) -> Option<CommandId> {
        let previous = {
            let mut outstanding = self.outstanding.lock().await;
            let previous = outstanding.command_id.replace(command_id);
            outstanding.pending = targets.iter().cloned().collect();
            outstanding.duration = None;
            previous
        };
        self.notify();
        previous
    }

    /// Record a readiness report. Returns `false` when `command_id` is stale.
    pub async fn mark_ready(
        &self,
        client_id: &ClientId,
        command_id: &CommandId,
        video_duration: Option<f64>,
    ) -> bool {
        let accepted = {
            let mut outstanding = self.outstanding.lock().await;
            if outstanding.command_id.as_ref() != Some(command_id) {
                return false;
            }
            outstanding.pending.remove(client_id);
            if outstanding.duration.is_none() {
                outstanding.duration = video_duration.filter(|duration| *duration > 0.0);
            }
            true
        };
        self.notify();
        accepted
    }

    /// Stop waiting on a client that went away
    pub async fn remove_client(&self, client_id: &ClientId) {
        let removed = self.outstanding.lock().await.pending.remove(client_id);
        if removed {
            self.notify();
        }
    }

    pub async fn is_current(&self, command_id: &CommandId) -> bool {
        self.outstanding.lock().await.command_id.as_ref() == Some(command_id)
    }

    /// Media duration reported by a player that is ready for `command_id`
    pub async fn reported_duration(&self, command_id: &CommandId) -> Option<f64> {
        let outstanding = self.outstanding.lock().await;
        if outstanding.command_id.as_ref() == Some(command_id) {
            outstanding.duration
        } else {
            None
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.outstanding.lock().await.pending.len()
    }

    /// Wait until every target of `command_id` is ready, the command is
    /// superseded, or `timeout` elapses.
    pub async fn wait(&self, command_id: &CommandId, timeout: Duration) -> ReadinessOutcome {
        let mut changed = self.changed.subscribe();
        let deadline = Instant::now() + timeout;

        loop {
            {
                let outstanding = self.outstanding.lock().await;
                if outstanding.command_id.as_ref() != Some(command_id) {
                    return ReadinessOutcome::Superseded;
                }
                if outstanding.pending.is_empty() {
                    return ReadinessOutcome::AllReady;
                }
            }

            match tokio::time::timeout_at(deadline, changed.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        let outstanding = self.outstanding.lock().await;
        if outstanding.command_id.as_ref() != Some(command_id) {
            ReadinessOutcome::Superseded
        } else if outstanding.pending.is_empty() {
            ReadinessOutcome::AllReady
        } else {
            ReadinessOutcome::TimedOut {
                pending: outstanding.pending.len(),
            }
        }
    }

    fn notify(&self) {
        self.changed.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}
