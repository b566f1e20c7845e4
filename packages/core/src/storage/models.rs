// Модели данных для хранилища

use serde::{Deserialize, Serialize};
use std::fmt;

/// Уровень секретности элемента
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityTier {
    /// Top secret: никогда не передаётся и не кэшируется
    T1,
    /// Highly secret: по запросу, кэш до истечения срока
    T2,
    /// Secret: синхронизируется и хранится зашифрованным
    T3,
}

impl SecurityTier {
    /// Метка деривации ключа; у T1 её нет
    pub fn label(&self) -> Option<&'static str> {
        match self {
            SecurityTier::T1 => None,
            SecurityTier::T2 => Some("SecretT2"),
            SecurityTier::T3 => Some("SecretT3"),
        }
    }

    pub fn is_transmittable(&self) -> bool {
        !matches!(self, SecurityTier::T1)
    }

    pub fn expires(&self) -> bool {
        matches!(self, SecurityTier::T2)
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityTier::T1 => "T1",
            SecurityTier::T2 => "T2",
            SecurityTier::T3 => "T3",
        };
        f.write_str(name)
    }
}

/// Элемент хранилища. Секрет хранится только зашифрованным.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredItem {
    pub id: String,
    pub vault_id: Option<String>,
    pub tier: SecurityTier,
    /// Открытые метаданные (название, URL и т.п.)
    pub metadata: serde_json::Value,
    /// AES-GCM конверт секрета под локальным ключом
    #[serde(with = "serde_bytes", default)]
    pub ciphertext: Option<Vec<u8>>,
    /// Ссылка на ключ в коротко живущем хранилище
    pub key_ref: Option<String>,
    pub updated_at: i64,
}

/// Привязка элемента к его ключу
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKeyRef {
    pub item_id: String,
    pub key_ref: String,
    pub tier: SecurityTier,
    pub created_at: i64,
}

/// Запомненное устройство пира
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// uuid эфемерной сессии первого сопряжения
    pub uuid: String,
    /// Идентификатор, назначенный пиром
    pub id: String,
    pub name: String,
    pub platform: String,
    pub session_id: String,
    pub scheme: u32,
    pub updated_at: i64,
}

/// Постоянная identity в durable-хранилище
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredIdentity {
    #[serde(with = "serde_bytes")]
    pub private_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    pub created_at: i64,
}

impl fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("public_key", &hex::encode(&self.public_key))
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Эфемерная пара ключей в коротко живущем хранилище (bincode)
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredEphemeral {
    pub uuid: String,
    #[serde(with = "serde_bytes")]
    pub private_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    pub created_at: i64,
}
