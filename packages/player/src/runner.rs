//! Player execution logic with reconnection support.

use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;

use crate::{
    error::PlayerError,
    playback::PlaybackModel,
    session::{PlayerOptions, run_player_session},
};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_INTERVAL_SECS: u64 = 5;

/// Run the player, reconnecting after dropped connections.
///
/// Gives up after `MAX_RECONNECT_ATTEMPTS` consecutive failures. A duplicate
/// device id is returned immediately since retrying cannot succeed.
pub async fn run_player(options: PlayerOptions) -> Result<(), PlayerError> {
    let model = Arc::new(Mutex::new(PlaybackModel::new()));
    let mut device_id = options.device_id.clone();
    let mut reconnect_count = 0;

    loop {
        tracing::info!(
            "Attempting to connect to {} as '{}' (attempt {}/{})",
            options.url,
            device_id.as_deref().unwrap_or("<new>"),
            reconnect_count + 1,
            MAX_RECONNECT_ATTEMPTS
        );

        match run_player_session(&options, &mut device_id, model.clone()).await {
            Ok(()) => {
                tracing::info!("Player session ended normally");
                break;
            }
            Err(e) if e.is_fatal() => {
                tracing::error!("{}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Connection lost: {}", e);
                reconnect_count += 1;

                if reconnect_count >= MAX_RECONNECT_ATTEMPTS {
                    tracing::error!(
                        "Failed to reconnect after {} attempts. Exiting.",
                        MAX_RECONNECT_ATTEMPTS
                    );
                    return Err(e);
                }

                tracing::info!(
                    "Reconnecting in {} seconds... (attempt {}/{})",
                    RECONNECT_INTERVAL_SECS,
                    reconnect_count + 1,
                    MAX_RECONNECT_ATTEMPTS
                );

                tokio::time::sleep(Duration::from_secs(RECONNECT_INTERVAL_SECS)).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        // テスト項目: 接続できないサーバーに対して最大回数で再接続を諦める
        // given (前提条件):
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let options = PlayerOptions {
            url: format!("ws://127.0.0.1:{}/ws", port),
            ..PlayerOptions::default()
        };

        // when (操作):
        let result = run_player(options).await;

        // then (期待する結果):
        assert!(matches!(result, Err(PlayerError::Connection(_))));
    }
}
