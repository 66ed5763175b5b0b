//! Repository trait 定義
//!
//! ドメイン層が必要とするクライアント台帳へのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。
//!
//! 更新系のメソッドはフィールド単位でアトミックに適用されます。受信ハンドラと
//! バックグラウンドループが同じクライアントを同時に更新しても、互いの更新を
//! 上書きしません。

use async_trait::async_trait;

use super::{
    Client, ClientId, ClientRole, ClientStatus, CommandId, RepositoryError, Timestamp,
    VideoReport, timing::ClockSample,
};

/// Client Repository trait
#[async_trait]
pub trait ClientRepository: Send + Sync {
    /// クライアントを保存（同じ ID があれば置き換え）
    async fn insert(&self, client: Client);

    /// クライアントを取得
    async fn get(&self, client_id: &ClientId) -> Option<Client>;

    /// 全クライアントを取得（ID 順）
    async fn list(&self) -> Vec<Client>;

    /// 指定ロールのクライアントを取得（ID 順）
    async fn list_by_role(&self, role: ClientRole) -> Vec<Client>;

    /// 最終アクティビティを更新。オフラインからオンラインに戻った場合は直前の状態を返す
    async fn touch(
        &self,
        client_id: &ClientId,
        at: Timestamp,
    ) -> Result<Option<ClientStatus>, RepositoryError>;

    /// 状態を遷移させ、直前の状態を返す
    async fn set_status(
        &self,
        client_id: &ClientId,
        status: ClientStatus,
        at: Timestamp,
    ) -> Result<ClientStatus, RepositoryError>;

    /// 時刻同期の測定結果を反映し、更新後のクライアントを返す
    async fn record_clock_sample(
        &self,
        client_id: &ClientId,
        sample: ClockSample,
    ) -> Result<Client, RepositoryError>;

    /// 指定クライアントの ready フラグをリセット
    async fn reset_readiness(&self, client_ids: &[ClientId]);

    /// ready フラグを立てる
    async fn mark_ready(
        &self,
        client_id: &ClientId,
        command_id: CommandId,
        buffer_level: f64,
    ) -> Result<(), RepositoryError>;

    /// クライアントが報告した再生状態を保存
    async fn update_report(
        &self,
        client_id: &ClientId,
        buffer_level: Option<f64>,
        video: Option<VideoReport>,
    ) -> Result<(), RepositoryError>;

    /// クライアントを削除
    async fn remove(&self, client_id: &ClientId) -> Option<Client>;
}
