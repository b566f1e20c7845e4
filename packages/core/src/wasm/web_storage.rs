// Хранилища поверх Web Storage API
// sessionStorage: эфемерные ключи и ключи элементов (живут до закрытия вкладки)
// localStorage: элементы, устройства, identity (JSON)

use crate::storage::models::{Device, ItemKeyRef, StoredIdentity, StoredItem};
use crate::storage::{SessionStore, VaultStore};
use crate::utils::b64;
use crate::utils::error::{PairingError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use web_sys::Storage;

const PREFIX: &str = "passlink:";

fn storage_error(e: wasm_bindgen::JsValue) -> PairingError {
    PairingError::Storage(format!("{:?}", e))
}

fn window_storage(session: bool) -> Result<Storage> {
    let window = web_sys::window().ok_or_else(|| PairingError::Storage("No window".to_string()))?;
    let storage = if session {
        window.session_storage()
    } else {
        window.local_storage()
    };
    storage
        .map_err(storage_error)?
        .ok_or_else(|| PairingError::Storage("Web Storage is unavailable".to_string()))
}

/// SessionStore на sessionStorage. Значения хранятся в base64.
pub struct WebSessionStore {
    storage: Storage,
}

impl WebSessionStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            storage: window_storage(true)?,
        })
    }
}

#[async_trait(?Send)]
impl SessionStore for WebSessionStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .storage
            .get_item(&format!("{}{}", PREFIX, key))
            .map_err(storage_error)?;
        value.map(|v| b64::decode(&v)).transpose()
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.storage
            .set_item(&format!("{}{}", PREFIX, key), &b64::encode(&value))
            .map_err(storage_error)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.storage
            .remove_item(&format!("{}{}", PREFIX, key))
            .map_err(storage_error)
    }
}

const ITEMS: &str = "passlink:items";
const KEYS: &str = "passlink:keys";
const DEVICES: &str = "passlink:devices";
const IDENTITY: &str = "passlink:identity";

/// VaultStore на localStorage
pub struct WebVaultStore {
    storage: Storage,
}

impl WebVaultStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            storage: window_storage(false)?,
        })
    }

    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.storage.get_item(key).map_err(storage_error)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(T::default()),
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.storage.set_item(key, &json).map_err(storage_error)
    }
}

#[async_trait(?Send)]
impl VaultStore for WebVaultStore {
    async fn get_items(&self, ids: &[String]) -> Result<Vec<StoredItem>> {
        let items: HashMap<String, StoredItem> = self.load(ITEMS)?;
        Ok(ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }

    async fn get_items_keys(&self, ids: &[String]) -> Result<Vec<ItemKeyRef>> {
        let keys: HashMap<String, ItemKeyRef> = self.load(KEYS)?;
        Ok(ids.iter().filter_map(|id| keys.get(id).cloned()).collect())
    }

    async fn save_items(&self, new_items: Vec<StoredItem>, new_keys: Vec<ItemKeyRef>) -> Result<()> {
        let mut items: HashMap<String, StoredItem> = self.load(ITEMS)?;
        let mut keys: HashMap<String, ItemKeyRef> = self.load(KEYS)?;

        for item in new_items {
            if item.key_ref.is_none() {
                keys.remove(&item.id);
            }
            items.insert(item.id.clone(), item);
        }
        for key in new_keys {
            keys.insert(key.item_id.clone(), key);
        }

        // Сначала ключи, потом элементы
        self.store(KEYS, &keys)?;
        self.store(ITEMS, &items)
    }

    async fn remove_items(&self, ids: &[String]) -> Result<()> {
        let mut items: HashMap<String, StoredItem> = self.load(ITEMS)?;
        let mut keys: HashMap<String, ItemKeyRef> = self.load(KEYS)?;
        for id in ids {
            items.remove(id);
            keys.remove(id);
        }
        self.store(ITEMS, &items)?;
        self.store(KEYS, &keys)
    }

    async fn get_devices(&self) -> Result<Vec<Device>> {
        let devices: HashMap<String, Device> = self.load(DEVICES)?;
        let mut devices: Vec<Device> = devices.into_values().collect();
        devices.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(devices)
    }

    async fn save_device(&self, device: Device) -> Result<()> {
        let mut devices: HashMap<String, Device> = self.load(DEVICES)?;
        devices.insert(device.id.clone(), device);
        self.store(DEVICES, &devices)
    }

    async fn remove_device(&self, id: &str) -> Result<()> {
        let mut devices: HashMap<String, Device> = self.load(DEVICES)?;
        devices.remove(id);
        self.store(DEVICES, &devices)
    }

    async fn get_identity(&self) -> Result<Option<StoredIdentity>> {
        self.load(IDENTITY)
    }

    async fn save_identity(&self, identity: StoredIdentity) -> Result<()> {
        self.store(IDENTITY, &Some(identity))
    }
}
