// Ключевой материал
// Постоянная identity, эфемерные ключи, ECDH + HKDF, ключи уровней

use crate::crypto::provider::CryptoProvider;
use crate::error::CryptoError;
use crate::storage::models::{SecurityTier, StoredEphemeral, StoredIdentity};
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::{PairingError, Result};
use std::fmt;
use std::marker::PhantomData;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Префикс ключей эфемерных записей в коротко живущем хранилище
pub const EPHEMERAL_PREFIX: &str = "ephe:";

/// Префикс HKDF info для всех меток
const LABEL_PREFIX: &str = "passlink/";

/// Байты секрета, затираются при drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// Сжатая SEC1 точка (33 байта для P-256)
pub type CompressedPoint = Vec<u8>;

/// Симметричный AES-256 ключ
pub type AesKey = SecretBytes;

/// Сырой результат ECDH
#[derive(Clone, Debug)]
pub struct SharedSecret(SecretBytes);

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// PRK после HKDF-Extract, из него разворачиваются все ключи сессии
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HkdfKey(SecretBytes);

impl HkdfKey {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Метка деривации. Разные метки дают независимые ключи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLabel<'a> {
    /// Ключ для полезной нагрузки фреймов
    Data,
    /// Ключ уровня секретности
    Tier(SecurityTier),
    /// Ключ конкретного элемента внутри уровня
    Item { tier: SecurityTier, item_id: &'a str },
}

impl KeyLabel<'_> {
    pub fn info(&self) -> std::result::Result<String, CryptoError> {
        let label = match self {
            KeyLabel::Data => "Data".to_string(),
            KeyLabel::Tier(tier) => Self::tier_label(*tier)?.to_string(),
            KeyLabel::Item { tier, item_id } => {
                if item_id.is_empty() {
                    return Err(CryptoError::KeyDerivationError("Empty item id".to_string()));
                }
                format!("{}:{}", Self::tier_label(*tier)?, item_id)
            }
        };
        Ok(format!("{}{}", LABEL_PREFIX, label))
    }

    fn tier_label(tier: SecurityTier) -> std::result::Result<&'static str, CryptoError> {
        tier.label().ok_or_else(|| {
            CryptoError::KeyDerivationError(format!("No key is ever derived for {}", tier))
        })
    }
}

/// Долгоживущая пара ключей клиента. Создаётся один раз, не ротируется.
#[derive(Clone)]
pub struct PersistentIdentity {
    private_key: SecretBytes,
    public_key: CompressedPoint,
    pub created_at: i64,
}

impl PersistentIdentity {
    pub fn private_key(&self) -> &SecretBytes {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }
}

impl fmt::Debug for PersistentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentIdentity")
            .field("public_key", &self.public_key_hex())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Эфемерная пара ключей одной попытки сопряжения
#[derive(Clone)]
pub struct EphemeralSession {
    pub uuid: String,
    private_key: SecretBytes,
    public_key: CompressedPoint,
}

impl EphemeralSession {
    pub fn private_key(&self) -> &SecretBytes {
        &self.private_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }
}

impl fmt::Debug for EphemeralSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralSession")
            .field("uuid", &self.uuid)
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Операции над ключевым материалом для конкретного набора примитивов
pub struct KeyMaterial<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> KeyMaterial<P> {
    /// Новая identity (не сохраняется)
    pub fn generate_identity() -> std::result::Result<PersistentIdentity, CryptoError> {
        let (private_key, public_key) = P::generate_keys()?;
        Ok(PersistentIdentity {
            private_key: SecretBytes::new(private_key.as_ref().to_vec()),
            public_key: public_key.as_ref().to_vec(),
            created_at: crate::utils::time::now_millis(),
        })
    }

    /// Восстановить identity из сохранённого приватного ключа
    pub fn identity_from_private(
        private_key: &[u8],
        created_at: i64,
    ) -> std::result::Result<PersistentIdentity, CryptoError> {
        let private_key = P::private_key_from_bytes(private_key)?;
        let public_key = P::public_from_private(&private_key)?;
        Ok(PersistentIdentity {
            private_key: SecretBytes::new(private_key.as_ref().to_vec()),
            public_key: public_key.as_ref().to_vec(),
            created_at,
        })
    }

    /// Прочитать identity из durable-хранилища; при первом запуске создать и сохранить
    pub async fn load_or_create_identity(vault: &dyn VaultStore) -> Result<PersistentIdentity> {
        use tracing::info;

        if let Some(stored) = vault.get_identity().await? {
            return Ok(Self::identity_from_private(&stored.private_key, stored.created_at)?);
        }

        let identity = Self::generate_identity()?;
        vault
            .save_identity(StoredIdentity {
                private_key: identity.private_key.as_bytes().to_vec(),
                public_key: identity.public_key.clone(),
                created_at: identity.created_at,
            })
            .await?;

        info!(
            target: "crypto::keys",
            public_key = %identity.public_key_hex(),
            "Created persistent identity"
        );
        Ok(identity)
    }

    pub fn generate_ephemeral() -> std::result::Result<EphemeralSession, CryptoError> {
        let (private_key, public_key) = P::generate_keys()?;
        Ok(EphemeralSession {
            uuid: crate::utils::uuid::generate_v4(),
            private_key: SecretBytes::new(private_key.as_ref().to_vec()),
            public_key: public_key.as_ref().to_vec(),
        })
    }

    /// Детерминированное сжатие точки. Принимает любую SEC1 кодировку.
    pub fn compress(public_key: &[u8]) -> std::result::Result<CompressedPoint, CryptoError> {
        Ok(P::compress_public_key(public_key)?.as_ref().to_vec())
    }

    pub fn decompress(point: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
        let compressed = P::compress_public_key(point)?;
        P::decompress_public_key(&compressed)
    }

    pub fn derive_shared_secret(
        ephemeral_private: &SecretBytes,
        peer_ephemeral_public: &[u8],
    ) -> std::result::Result<SharedSecret, CryptoError> {
        let private_key = P::private_key_from_bytes(ephemeral_private.as_bytes())?;
        let shared = P::key_agreement(&private_key, peer_ephemeral_public)?;

        if shared.iter().all(|b| *b == 0) {
            return Err(CryptoError::KeyAgreementError("Degenerate shared secret".to_string()));
        }
        Ok(SharedSecret(SecretBytes::new(shared)))
    }

    pub fn derive_session_key(
        salt: &[u8],
        shared_secret: &SharedSecret,
    ) -> std::result::Result<HkdfKey, CryptoError> {
        if salt.is_empty() {
            return Err(CryptoError::KeyDerivationError("Empty salt".to_string()));
        }
        let prk = P::hkdf_extract(salt, shared_secret.as_bytes())?;
        Ok(HkdfKey(SecretBytes::new(prk)))
    }

    pub fn derive_tier_key(
        hkdf_key: &HkdfKey,
        label: KeyLabel<'_>,
    ) -> std::result::Result<AesKey, CryptoError> {
        let info = label.info()?;
        let key_len = crate::config::Config::global().aes_key_length;
        let okm = P::hkdf_expand(hkdf_key.as_bytes(), info.as_bytes(), key_len)?;
        Ok(SecretBytes::new(okm))
    }

    pub fn derive_item_key(
        hkdf_key: &HkdfKey,
        tier: SecurityTier,
        item_id: &str,
    ) -> std::result::Result<AesKey, CryptoError> {
        Self::derive_tier_key(hkdf_key, KeyLabel::Item { tier, item_id })
    }

    /// Случайный локальный ключ (перешифровка, кэш T2)
    pub fn random_key() -> AesKey {
        SecretBytes::new(P::random_bytes(crate::config::Config::global().aes_key_length))
    }

    // ========================================================================
    // Коротко живущее хранилище эфемерных ключей
    // ========================================================================

    pub fn ephemeral_storage_key(uuid: &str) -> String {
        format!("{}{}", EPHEMERAL_PREFIX, uuid)
    }

    pub async fn store_ephemeral(store: &dyn SessionStore, ephemeral: &EphemeralSession) -> Result<()> {
        let record = StoredEphemeral {
            uuid: ephemeral.uuid.clone(),
            private_key: ephemeral.private_key.as_bytes().to_vec(),
            public_key: ephemeral.public_key.clone(),
            created_at: crate::utils::time::now_millis(),
        };
        let bytes = bincode::serialize(&record)?;
        store
            .set(&Self::ephemeral_storage_key(&ephemeral.uuid), bytes)
            .await
    }

    pub async fn load_ephemeral(store: &dyn SessionStore, uuid: &str) -> Result<EphemeralSession> {
        let bytes = store
            .get(&Self::ephemeral_storage_key(uuid))
            .await?
            .ok_or_else(|| {
                PairingError::KeyDerivationFailure(format!("No ephemeral key for {}", uuid))
            })?;
        let record: StoredEphemeral = bincode::deserialize(&bytes)?;

        // Публичный ключ пересчитываем, запись могла быть повреждена
        let private_key = P::private_key_from_bytes(&record.private_key)?;
        let public_key = P::public_from_private(&private_key)?;
        if public_key.as_ref() != record.public_key.as_slice() {
            return Err(PairingError::KeyDerivationFailure(
                "Stored ephemeral key pair is inconsistent".to_string(),
            ));
        }

        Ok(EphemeralSession {
            uuid: record.uuid,
            private_key: SecretBytes::new(record.private_key),
            public_key: record.public_key,
        })
    }

    /// Перезаписать и удалить эфемерную запись
    pub async fn clear_ephemeral(store: &dyn SessionStore, uuid: &str) -> Result<()> {
        let key = Self::ephemeral_storage_key(uuid);
        if store.get(&key).await?.is_some() {
            store.set(&key, Vec::new()).await?;
        }
        store.remove(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::suites::p256::P256Suite;
    use crate::storage::memory::{MemorySessionStore, MemoryVaultStore};

    type Keys = KeyMaterial<P256Suite>;

    fn hkdf_key() -> HkdfKey {
        let a = Keys::generate_ephemeral().unwrap();
        let b = Keys::generate_ephemeral().unwrap();
        let shared = Keys::derive_shared_secret(a.private_key(), b.public_key()).unwrap();
        Keys::derive_session_key(&[9u8; 32], &shared).unwrap()
    }

    #[test]
    fn test_labels_are_disjoint() {
        let key = hkdf_key();
        let data = Keys::derive_tier_key(&key, KeyLabel::Data).unwrap();
        let t2 = Keys::derive_tier_key(&key, KeyLabel::Tier(SecurityTier::T2)).unwrap();
        let t3 = Keys::derive_tier_key(&key, KeyLabel::Tier(SecurityTier::T3)).unwrap();

        assert_ne!(data, t2);
        assert_ne!(t2, t3);
        assert_eq!(t3.len(), 32);
    }

    #[test]
    fn test_t1_never_derives() {
        let key = hkdf_key();
        let result = Keys::derive_tier_key(&key, KeyLabel::Tier(SecurityTier::T1));
        assert!(matches!(result, Err(CryptoError::KeyDerivationError(_))));
        assert!(Keys::derive_item_key(&key, SecurityTier::T1, "item").is_err());
    }

    #[test]
    fn test_label_info() {
        assert_eq!(KeyLabel::Data.info().unwrap(), "passlink/Data");
        assert_eq!(
            KeyLabel::Item { tier: SecurityTier::T2, item_id: "abc" }.info().unwrap(),
            "passlink/SecretT2:abc"
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let eph = Keys::generate_ephemeral().unwrap();
        let debug = format!("{:?}", eph.private_key());
        assert!(debug.contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_ephemeral_store_and_clear() {
        let store = MemorySessionStore::new();
        let eph = Keys::generate_ephemeral().unwrap();

        Keys::store_ephemeral(&store, &eph).await.unwrap();
        let loaded = Keys::load_ephemeral(&store, &eph.uuid).await.unwrap();
        assert_eq!(loaded.public_key(), eph.public_key());

        Keys::clear_ephemeral(&store, &eph.uuid).await.unwrap();
        assert!(Keys::load_ephemeral(&store, &eph.uuid).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_identity_created_once() {
        let vault = MemoryVaultStore::new();
        let first = Keys::load_or_create_identity(&vault).await.unwrap();
        let second = Keys::load_or_create_identity(&vault).await.unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }
}
