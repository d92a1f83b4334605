//! Local persistence used to rehydrate entities without a round trip.

use flow_model::InstanceId;
use std::collections::HashMap;
use std::sync::Mutex;

/// Key prefix for persisted entity snapshots.
pub const STORAGE_KEY_PREFIX: &str = "flow.storage.";

/// Storage key of an entity: `flow.storage.<instanceId>`.
pub fn storage_key(instance_id: &InstanceId) -> String {
    format!("{STORAGE_KEY_PREFIX}{instance_id}")
}

/// Synchronous key/value storage (browser `localStorage` semantics).
pub trait StateStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: String);
}

/// In-memory storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set_item(&self, key: &str, value: String) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
    }
}
