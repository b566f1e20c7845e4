// Модуль хранилища
//
// Два внешних коллаборатора:
// - SessionStore: коротко живущее хранилище (эфемерные ключи, ключи элементов)
// - VaultStore: durable-хранилище элементов, устройств и identity

pub mod memory;
pub mod models;

use crate::utils::error::Result;
use crate::utils::Shared;
use async_trait::async_trait;
use models::{Device, ItemKeyRef, StoredIdentity, StoredItem};

/// Коротко живущее key-value хранилище, живёт не дольше сессии браузера
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait SessionStore: Shared {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Durable-хранилище. Пишется только через RequestRouter и DeviceBook.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait VaultStore: Shared {
    /// Отсутствующие id пропускаются
    async fn get_items(&self, ids: &[String]) -> Result<Vec<StoredItem>>;
    async fn get_items_keys(&self, ids: &[String]) -> Result<Vec<ItemKeyRef>>;
    /// Записывает элементы и их ключи одной операцией, заменяя существующие
    async fn save_items(&self, items: Vec<StoredItem>, keys: Vec<ItemKeyRef>) -> Result<()>;
    /// Удаляет элементы вместе с их ключами
    async fn remove_items(&self, ids: &[String]) -> Result<()>;

    async fn get_devices(&self) -> Result<Vec<Device>>;
    async fn save_device(&self, device: Device) -> Result<()>;
    async fn remove_device(&self, id: &str) -> Result<()>;

    async fn get_identity(&self) -> Result<Option<StoredIdentity>>;
    async fn save_identity(&self, identity: StoredIdentity) -> Result<()>;
}
