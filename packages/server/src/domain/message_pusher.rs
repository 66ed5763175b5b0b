//! MessagePusher trait 定義
//!
//! クライアントへのメッセージ送信を抽象化します。
//! WebSocket の生成は UI 層、送信の実装は Infrastructure 層が担当します。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ClientId, MessagePushError};

/// Outbound channel of one connection
pub type PusherChannel = mpsc::UnboundedSender<String>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePusher: Send + Sync {
    /// 送信チャンネルを登録（同じ ID があれば置き換え）
    async fn register_client(&self, client_id: ClientId, sender: PusherChannel);

    /// 送信チャンネルを登録解除
    async fn unregister_client(&self, client_id: &ClientId);

    /// 特定のクライアントに送信
    async fn push_to(&self, client_id: &ClientId, content: &str) -> Result<(), MessagePushError>;

    /// 複数のクライアントに送信し、送信に失敗したクライアントを返す
    async fn broadcast(&self, targets: Vec<ClientId>, content: &str) -> Vec<ClientId>;
}
