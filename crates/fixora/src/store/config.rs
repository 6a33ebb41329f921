use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::StoreResult;
use crate::codec::SecretCodec;

pub const PROVIDER_KEY: &str = "provider";
pub const MODEL_KEY: &str = "model";

#[derive(Clone)]
struct Entry {
    value: String,
    encrypted: bool,
}

/// Key-value configuration with optional encryption per entry
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Raw stored value; ciphertext for encrypted entries
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value, encrypting it first when asked. Returns whether an
    /// existing value was replaced.
    async fn set(&self, key: &str, value: &str, encrypt: bool) -> StoreResult<bool>;

    /// Plaintext value, decrypting encrypted entries
    async fn get_decrypted(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> bool;

    async fn keys(&self) -> Vec<String>;
}

pub struct MemoryConfigStore {
    codec: Arc<dyn SecretCodec>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryConfigStore {
    pub fn new(codec: Arc<dyn SecretCodec>) -> Self {
        Self {
            codec,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: &str, encrypt: bool) -> StoreResult<bool> {
        let value = if encrypt {
            self.codec.encrypt(value)?
        } else {
            value.to_string()
        };
        let previous = self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value,
                encrypted: encrypt,
            },
        );
        Ok(previous.is_some())
    }

    async fn get_decrypted(&self, key: &str) -> StoreResult<Option<String>> {
        let entry = self.entries.read().await.get(key).cloned();
        match entry {
            Some(entry) if entry.encrypted => Ok(Some(self.codec.decrypt(&entry.value)?)),
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}
