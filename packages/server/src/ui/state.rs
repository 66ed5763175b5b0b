//! Shared application state.

use std::sync::Arc;

use crate::usecase::SyncEngine;

/// Shared application state
pub struct AppState {
    /// Synchronization Engine（全ハンドラが共有する唯一のインスタンス）
    pub engine: Arc<SyncEngine>,
}
