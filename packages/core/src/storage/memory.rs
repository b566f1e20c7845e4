// In-memory storage для тестов и non-WASM платформ

use crate::storage::models::*;
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::{PairingError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory коротко живущее хранилище
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Все последующие `set` завершаются ошибкой Storage; удаление работает
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PairingError::Storage("Session storage is full".to_string()));
        }
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct VaultState {
    items: HashMap<String, StoredItem>,
    keys: HashMap<String, ItemKeyRef>,
    devices: HashMap<String, Device>,
    identity: Option<StoredIdentity>,
    fail_writes: bool,
    writes: usize,
}

/// In-memory durable-хранилище
#[derive(Default)]
pub struct MemoryVaultStore {
    state: Mutex<VaultState>,
}

impl MemoryVaultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Все последующие записи завершаются ошибкой Storage
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Количество успешных операций записи элементов
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn item(&self, id: &str) -> Option<StoredItem> {
        self.state.lock().items.get(id).cloned()
    }

    pub fn item_key(&self, id: &str) -> Option<ItemKeyRef> {
        self.state.lock().keys.get(id).cloned()
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().items.len()
    }

    fn check_writable(state: &VaultState) -> Result<()> {
        if state.fail_writes {
            return Err(PairingError::Storage("Vault is read-only".to_string()));
        }
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl VaultStore for MemoryVaultStore {
    async fn get_items(&self, ids: &[String]) -> Result<Vec<StoredItem>> {
        let state = self.state.lock();
        Ok(ids.iter().filter_map(|id| state.items.get(id).cloned()).collect())
    }

    async fn get_items_keys(&self, ids: &[String]) -> Result<Vec<ItemKeyRef>> {
        let state = self.state.lock();
        Ok(ids.iter().filter_map(|id| state.keys.get(id).cloned()).collect())
    }

    async fn save_items(&self, items: Vec<StoredItem>, keys: Vec<ItemKeyRef>) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;

        for item in items {
            // Элемент без ключа не должен ссылаться на старый ключ
            if item.key_ref.is_none() {
                state.keys.remove(&item.id);
            }
            state.items.insert(item.id.clone(), item);
        }
        for key in keys {
            state.keys.insert(key.item_id.clone(), key);
        }
        state.writes += 1;
        Ok(())
    }

    async fn remove_items(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;

        for id in ids {
            state.items.remove(id);
            state.keys.remove(id);
        }
        state.writes += 1;
        Ok(())
    }

    async fn get_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self.state.lock().devices.values().cloned().collect();
        devices.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(devices)
    }

    async fn save_device(&self, device: Device) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn remove_device(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.devices.remove(id);
        Ok(())
    }

    async fn get_identity(&self) -> Result<Option<StoredIdentity>> {
        Ok(self.state.lock().identity.clone())
    }

    async fn save_identity(&self, identity: StoredIdentity) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state)?;
        state.identity = Some(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, key_ref: Option<&str>) -> StoredItem {
        StoredItem {
            id: id.to_string(),
            vault_id: None,
            tier: SecurityTier::T3,
            metadata: serde_json::json!({ "name": id }),
            ciphertext: Some(vec![1, 2, 3]),
            key_ref: key_ref.map(str::to_string),
            updated_at: 1,
        }
    }

    fn key(id: &str, key_ref: &str) -> ItemKeyRef {
        ItemKeyRef {
            item_id: id.to_string(),
            key_ref: key_ref.to_string(),
            tier: SecurityTier::T3,
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn test_save_replaces_key() {
        let vault = MemoryVaultStore::new();
        vault
            .save_items(vec![item("a", Some("ik:1"))], vec![key("a", "ik:1")])
            .await
            .unwrap();
        vault
            .save_items(vec![item("a", Some("ik:2"))], vec![key("a", "ik:2")])
            .await
            .unwrap();

        let keys = vault.get_items_keys(&["a".to_string()]).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_ref, "ik:2");
    }

    #[tokio::test]
    async fn test_remove_items_drops_keys() {
        let vault = MemoryVaultStore::new();
        vault
            .save_items(vec![item("a", Some("ik:1"))], vec![key("a", "ik:1")])
            .await
            .unwrap();
        vault.remove_items(&["a".to_string()]).await.unwrap();

        assert!(vault.item("a").is_none());
        assert!(vault.item_key("a").is_none());
        // Повторное удаление не ошибка
        vault.remove_items(&["a".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let vault = MemoryVaultStore::new();
        vault.set_fail_writes(true);
        let result = vault.save_items(vec![item("a", None)], vec![]).await;
        assert!(matches!(result, Err(PairingError::Storage(_))));
        assert_eq!(vault.item_count(), 0);
    }

    #[tokio::test]
    async fn test_session_store() {
        let store = MemorySessionStore::new();
        store.set("k", vec![1]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1]));
        store.remove("k").await.unwrap();
        assert!(store.is_empty());

        store.set_fail_writes(true);
        assert!(matches!(store.set("k", vec![1]).await, Err(PairingError::Storage(_))));
        assert!(store.is_empty());
    }
}
