//! InMemory Client Repository 実装
//!
//! ドメイン層が定義する ClientRepository trait の具体的な実装。
//! HashMap をインメモリ DB として使用し、1 つの Mutex で全更新を直列化します。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Client, ClientId, ClientRepository, ClientRole, ClientStatus, ClockSample, CommandId,
    RepositoryError, Timestamp, VideoReport,
};

/// インメモリ Client Repository 実装
#[derive(Default)]
pub struct InMemoryClientRepository {
    clients: Mutex<HashMap<ClientId, Client>>,
}

impl InMemoryClientRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(client_id: &ClientId) -> RepositoryError {
    RepositoryError::ClientNotFound(client_id.as_str().to_string())
}

fn sorted(mut clients: Vec<Client>) -> Vec<Client> {
    clients.sort_by(|a, b| a.id.cmp(&b.id));
    clients
}

#[async_trait]
impl ClientRepository for InMemoryClientRepository {
    async fn insert(&self, client: Client) {
        let mut clients = self.clients.lock().await;
        clients.insert(client.id.clone(), client);
    }

    async fn get(&self, client_id: &ClientId) -> Option<Client> {
        let clients = self.clients.lock().await;
        clients.get(client_id).cloned()
    }

    async fn list(&self) -> Vec<Client> {
        let clients = self.clients.lock().await;
        sorted(clients.values().cloned().collect())
    }

    async fn list_by_role(&self, role: ClientRole) -> Vec<Client> {
        let clients = self.clients.lock().await;
        sorted(
            clients
                .values()
                .filter(|client| client.role == role)
                .cloned()
                .collect(),
        )
    }

    async fn touch(
        &self,
        client_id: &ClientId,
        at: Timestamp,
    ) -> Result<Option<ClientStatus>, RepositoryError> {
        let mut clients = self.clients.lock().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| not_found(client_id))?;
        let previous = client.status;
        Ok(client.touch(at).then_some(previous))
    }

    async fn set_status(
        &self,
        client_id: &ClientId,
        status: ClientStatus,
        at: Timestamp,
    ) -> Result<ClientStatus, RepositoryError> {
        let mut clients = self.clients.lock().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| not_found(client_id))?;
        Ok(client.set_status(status, at))
    }

    async fn record_clock_sample(
        &self,
        client_id: &ClientId,
        sample: ClockSample,
    ) -> Result<Client, RepositoryError> {
        let mut clients = self.clients.lock().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| not_found(client_id))?;
        client.record_clock_sample(sample);
        Ok(client.clone())
    }

    async fn reset_readiness(&self, client_ids: &[ClientId]) {
        let mut clients = self.clients.lock().await;
        for client_id in client_ids {
            if let Some(client) = clients.get_mut(client_id) {
                client.reset_readiness();
            }
        }
    }

    async fn mark_ready(
        &self,
        client_id: &ClientId,
        command_id: CommandId,
        buffer_level: f64,
    ) -> Result<(), RepositoryError> {
        let mut clients = self.clients.lock().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| not_found(client_id))?;
        client.mark_ready(command_id, buffer_level);
        Ok(())
    }

    async fn update_report(
        &self,
        client_id: &ClientId,
        buffer_level: Option<f64>,
        video: Option<VideoReport>,
    ) -> Result<(), RepositoryError> {
        let mut clients = self.clients.lock().await;
        let client = clients
            .get_mut(client_id)
            .ok_or_else(|| not_found(client_id))?;
        if let Some(level) = buffer_level {
            client.buffer_level = level.clamp(0.0, 1.0);
        }
        if video.is_some() {
            client.current_video = video;
        }
        Ok(())
    }

    async fn remove(&self, client_id: &ClientId) -> Option<Client> {
        let mut clients = self.clients.lock().await;
        clients.remove(client_id)
    }
}
