use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::codec::SecretCodec;

/// External services that contribute tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Github,
    Supabase,
    Mcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// A stored credential set for an external service.
///
/// `kind` is kept as the raw identifier so connections of types this build does
/// not understand can still be stored and listed. Credential values are
/// encrypted and never serialized.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub credentials: HashMap<String, String>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Create a connection, encrypting every credential value
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        credentials: HashMap<String, String>,
        codec: &dyn SecretCodec,
    ) -> StoreResult<Self> {
        let credentials = credentials
            .into_iter()
            .map(|(key, value)| Ok((key, codec.encrypt(&value)?)))
            .collect::<StoreResult<HashMap<_, _>>>()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            name: name.into(),
            credentials,
            status: ConnectionStatus::Connected,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn connection_kind(&self) -> Option<ConnectionKind> {
        self.kind.parse().ok()
    }

    pub fn decrypt_credentials(&self, codec: &dyn SecretCodec) -> StoreResult<HashMap<String, String>> {
        self.credentials
            .iter()
            .map(|(key, value)| Ok((key.clone(), codec.decrypt(value)?)))
            .collect()
    }
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Option<Connection>;

    async fn list(&self) -> Vec<Connection>;

    async fn insert(&self, connection: Connection) -> Connection;

    async fn update_status(&self, id: Uuid, status: ConnectionStatus) -> StoreResult<Connection>;

    async fn remove(&self, id: Uuid) -> StoreResult<Connection>;
}

#[derive(Default)]
pub struct MemoryConnectionStore {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get_by_id(&self, id: Uuid) -> Option<Connection> {
        self.connections.read().await.get(&id).cloned()
    }

    async fn list(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> =
            self.connections.read().await.values().cloned().collect();
        connections.sort_by_key(|c| c.created_at);
        connections
    }

    async fn insert(&self, connection: Connection) -> Connection {
        self.connections
            .write()
            .await
            .insert(connection.id, connection.clone());
        connection
    }

    async fn update_status(&self, id: Uuid, status: ConnectionStatus) -> StoreResult<Connection> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        connection.status = status;
        connection.updated_at = Utc::now();
        Ok(connection.clone())
    }

    async fn remove(&self, id: Uuid) -> StoreResult<Connection> {
        self.connections
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::AeadCodec;

    fn credentials(token: &str) -> HashMap<String, String> {
        HashMap::from([("token".to_string(), token.to_string())])
    }

    #[test]
    fn test_credentials_encrypted() {
        let codec = AeadCodec::from_secret("test");
        let connection =
            Connection::new("github", "work", credentials("ghp_secret"), &codec).unwrap();

        assert_ne!(connection.credentials["token"], "ghp_secret");
        assert_eq!(
            connection.decrypt_credentials(&codec).unwrap()["token"],
            "ghp_secret"
        );
        assert_eq!(connection.connection_kind(), Some(ConnectionKind::Github));

        let json = serde_json::to_value(&connection).unwrap();
        assert!(json.get("credentials").is_none());
        assert_eq!(json["kind"], "github");
        assert_eq!(json["status"], "connected");
    }

    #[test]
    fn test_unknown_kind() {
        let codec = AeadCodec::from_secret("test");
        let connection = Connection::new("jira", "tickets", HashMap::new(), &codec).unwrap();
        assert_eq!(connection.connection_kind(), None);
    }

    #[tokio::test]
    async fn test_crud() {
        let codec = AeadCodec::from_secret("test");
        let store = MemoryConnectionStore::new();

        let created = store
            .insert(Connection::new("github", "work", credentials("a"), &codec).unwrap())
            .await;
        assert_eq!(store.list().await.len(), 1);
        assert_eq!(store.get_by_id(created.id).await.unwrap().name, "work");

        let updated = store
            .update_status(created.id, ConnectionStatus::Error)
            .await
            .unwrap();
        assert_eq!(updated.status, ConnectionStatus::Error);

        store.remove(created.id).await.unwrap();
        assert!(store.get_by_id(created.id).await.is_none());
        assert_eq!(
            store.remove(created.id).await.unwrap_err(),
            StoreError::NotFound(created.id.to_string())
        );
    }
}
