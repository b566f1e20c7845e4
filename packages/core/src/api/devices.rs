// Запомненные устройства и push-пробуждение

use crate::crypto::keys::{EphemeralSession, PersistentIdentity};
use crate::crypto::{PairingKeys, PairingSigner};
use crate::protocol::messages::HelloPayload;
use crate::storage::models::Device;
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::{PairingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Подписанный запрос на пробуждение пира
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WakeRequest {
    pub device_id: String,
    pub session_id: String,
    pub persistent_public_key: String,
    pub ephemeral_public_key: String,
    pub timestamp: i64,
    pub signature: String,
}

impl WakeRequest {
    fn signed_message(
        session_id: &str,
        persistent_public_key: &[u8],
        ephemeral_public_key: &[u8],
        timestamp: i64,
    ) -> String {
        format!(
            "{}{}",
            PairingSigner::canonical_message(session_id, persistent_public_key, ephemeral_public_key),
            timestamp
        )
    }

    pub fn build(
        device: &Device,
        session_id: &str,
        identity: &PersistentIdentity,
        ephemeral: &EphemeralSession,
        timestamp: i64,
    ) -> Result<Self> {
        let message = Self::signed_message(
            session_id,
            identity.public_key(),
            ephemeral.public_key(),
            timestamp,
        );
        let signature = PairingSigner::sign_bytes(identity.private_key(), message.as_bytes())?;

        Ok(Self {
            device_id: device.id.clone(),
            session_id: session_id.to_string(),
            persistent_public_key: identity.public_key_hex(),
            ephemeral_public_key: ephemeral.public_key_hex(),
            timestamp,
            signature,
        })
    }

    pub fn verify(&self) -> Result<()> {
        let persistent = hex::decode(&self.persistent_public_key)
            .map_err(|_| PairingError::Validation("Invalid persistent key hex".to_string()))?;
        let ephemeral = hex::decode(&self.ephemeral_public_key)
            .map_err(|_| PairingError::Validation("Invalid ephemeral key hex".to_string()))?;

        let message = Self::signed_message(&self.session_id, &persistent, &ephemeral, self.timestamp);
        PairingSigner::verify_bytes(&persistent, message.as_bytes(), &self.signature)
            .map_err(|e| PairingError::SignatureFailure(e.to_string()))
    }
}

/// Канал пробуждения пира (push). Fire-and-forget.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait PushChannel {
    async fn wake(&self, device: &Device, request: &WakeRequest) -> Result<()>;
}

/// Реестр устройств поверх durable-хранилища
#[derive(Clone)]
pub struct DeviceBook {
    vault: Arc<dyn VaultStore>,
}

impl DeviceBook {
    pub fn new(vault: Arc<dyn VaultStore>) -> Self {
        Self { vault }
    }

    /// Создать или обновить запись после успешного HELLO
    pub async fn record_hello(
        &self,
        ephemeral_uuid: &str,
        hello: &HelloPayload,
        session_id: &str,
        scheme: u32,
    ) -> Result<Device> {
        use tracing::info;

        let device = Device {
            uuid: ephemeral_uuid.to_string(),
            id: hello.device_id.clone(),
            name: hello.device_name.clone(),
            platform: hello.device_platform.clone(),
            session_id: session_id.to_string(),
            scheme,
            updated_at: crate::utils::time::now_millis(),
        };
        self.vault.save_device(device.clone()).await?;

        info!(
            target: "api::devices",
            device_id = %device.id,
            platform = %device.platform,
            "Device remembered"
        );
        Ok(device)
    }

    pub async fn list(&self) -> Result<Vec<Device>> {
        self.vault.get_devices().await
    }

    pub async fn get(&self, device_id: &str) -> Result<Device> {
        self.list()
            .await?
            .into_iter()
            .find(|device| device.id == device_id)
            .ok_or_else(|| PairingError::Validation(format!("Unknown device {}", device_id)))
    }

    /// Единственный способ удалить устройство
    pub async fn forget_device(&self, device_id: &str, session_store: &dyn SessionStore) -> Result<()> {
        let device = self.get(device_id).await?;
        PairingKeys::clear_ephemeral(session_store, &device.uuid).await?;
        self.vault.remove_device(device_id).await
    }
}
