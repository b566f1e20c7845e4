//! Маршрутизация PULL_REQUEST_ACTION по уровням секретности
//!
//! Каждый обработчик сначала расшифровывает и готовит все артефакты в памяти,
//! и только потом делает одну запись в хранилища. Ошибка на этапе подготовки
//! ничего не оставляет после себя.

use crate::api::expiry::ExpiryScheduler;
use crate::crypto::keys::{AesKey, HkdfKey, SecretBytes};
use crate::crypto::{PairingCipher, PairingKeys};
use crate::protocol::messages::{
    ActionStatus, DeleteItemData, FullSyncData, ItemData, PullRequestAction, PullRequestKind,
    SifData,
};
use crate::state::registry::CancelSignal;
use crate::storage::models::{ItemKeyRef, SecurityTier, StoredItem};
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::{PairingError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// Префикс ключей перешифровки, выданных вызывающему
pub const TRANSPORT_KEY_PREFIX: &str = "tk:";

/// Секрет, полученный по запросу
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedSecret {
    /// Перешифрован локальным транспортным ключом из коротко живущего хранилища
    Wrapped { key_ref: String, envelope: Vec<u8> },
    Plain(SecretBytes),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecretFetch {
    pub item_id: String,
    pub tier: SecurityTier,
    pub secret: FetchedSecret,
    /// Срок очистки кэша для T2
    pub expires_at: Option<i64>,
}

/// Результат обработки запроса
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Пир отклонил запрос
    Declined { kind: PullRequestKind },
    Fetched(SecretFetch),
    Saved { item_ids: Vec<String> },
    /// Элемент T1: сохранены только метаданные
    MetadataOnly { item_id: String },
    /// Элемент добавлен в другой vault, локально ничего не пишется
    AddedElsewhere { item_id: Option<String> },
    Deleted { item_id: String },
    Synced { added: Vec<String>, updated: Vec<String> },
}

/// Ключи и сигнал отмены текущей сессии
pub struct RouteContext<'a> {
    pub hkdf_key: &'a HkdfKey,
    pub cancel: &'a CancelSignal,
    pub now: i64,
}

/// Подготовленный к записи элемент
struct PreparedItem {
    item: StoredItem,
    key: Option<(ItemKeyRef, AesKey)>,
    superseded: Option<String>,
    existed: bool,
}

pub struct RequestRouter {
    session_store: Arc<dyn SessionStore>,
    vault: Arc<dyn VaultStore>,
    expiry: ExpiryScheduler,
    rewrap: bool,
}

impl RequestRouter {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        vault: Arc<dyn VaultStore>,
        expiry: ExpiryScheduler,
    ) -> Self {
        Self {
            session_store,
            vault,
            expiry,
            rewrap: crate::config::Config::global().rewrap_fetched_secrets,
        }
    }

    /// Включить/выключить перешифровку полученных секретов
    pub fn with_rewrap(mut self, rewrap: bool) -> Self {
        self.rewrap = rewrap;
        self
    }

    pub fn expiry(&self) -> &ExpiryScheduler {
        &self.expiry
    }

    /// Обработать расшифрованное действие (без чанковой передачи)
    pub async fn route(&self, action: &PullRequestAction, ctx: &RouteContext<'_>) -> Result<RouteOutcome> {
        use tracing::info;

        action.validate()?;
        ctx.cancel.check()?;

        info!(
            target: "api::router",
            action = %action.action,
            status = %action.status,
            "Routing pull request action"
        );

        if action.status == ActionStatus::Cancel {
            return Ok(RouteOutcome::Declined { kind: action.action });
        }

        match action.action {
            PullRequestKind::SifRequest => self.sif_request(parse_data(action)?, ctx).await,
            PullRequestKind::AddData => self.add_data(action, ctx).await,
            PullRequestKind::UpdateData => self.update_data(parse_data(action)?, ctx).await,
            PullRequestKind::DeleteData => self.delete_data(parse_data(action)?, ctx).await,
            PullRequestKind::FullSync => Err(PairingError::InvalidAction(
                "fullSync data arrives through a chunked transfer".to_string(),
            )),
        }
    }

    /// Полная синхронизация: собранные и распакованные байты передачи
    pub async fn route_full_sync(&self, payload: &[u8], ctx: &RouteContext<'_>) -> Result<RouteOutcome> {
        use tracing::info;

        ctx.cancel.check()?;
        let data: FullSyncData = serde_json::from_slice(payload)?;

        let (added, updated) = self.upsert(data.items, false, ctx).await?;

        info!(
            target: "api::router",
            added = added.len(),
            updated = updated.len(),
            "Full sync applied"
        );
        Ok(RouteOutcome::Synced { added, updated })
    }

    // ========================================================================
    // Обработчики
    // ========================================================================

    async fn sif_request(&self, data: SifData, ctx: &RouteContext<'_>) -> Result<RouteOutcome> {
        let ids = vec![data.item_id.clone()];
        let local = self
            .vault
            .get_items(&ids)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PairingError::MissingItem(data.item_id.clone()))?;

        if !local.tier.is_transmittable() {
            return Err(wrong_tier(&local.id, "T1 secrets are never transmitted"));
        }
        if local.tier != data.tier {
            return Err(wrong_tier(
                &local.id,
                &format!("peer sent {} for a {} item", data.tier, local.tier),
            ));
        }

        let plaintext = self.decrypt_item_secret(&local.id, local.tier, &data.secret, ctx)?;

        // Кэш T2: шифртекст под локальным ключом с автоочисткой
        let cache = if local.tier.expires() {
            let existing_key = self.vault.get_items_keys(&ids).await?.into_iter().next();
            let (ciphertext, key_ref, local_key) = self.reencrypt(&local.id, local.tier, &plaintext, ctx)?;
            let mut item = local.clone();
            item.ciphertext = Some(ciphertext);
            item.key_ref = Some(key_ref.key_ref.clone());
            item.updated_at = ctx.now;
            Some(PreparedItem {
                item,
                key: Some((key_ref, local_key)),
                superseded: existing_key.map(|k| k.key_ref),
                existed: true,
            })
        } else {
            None
        };

        let wrapped = if self.rewrap {
            let transport_key = PairingKeys::random_key();
            let envelope = PairingCipher::seal(&transport_key, plaintext.as_bytes(), Some(local.id.as_bytes()))?;
            let key_ref = format!("{}{}", TRANSPORT_KEY_PREFIX, crate::utils::uuid::generate_v4());
            Some((key_ref, transport_key, envelope))
        } else {
            None
        };

        // Ключ перешифровки пишется до кэша: если запись не удалась, кэш не тронут
        if let Some((key_ref, transport_key, _)) = &wrapped {
            ctx.cancel.check()?;
            self.session_store
                .set(key_ref, transport_key.as_bytes().to_vec())
                .await?;
        }

        if let Some(prepared) = cache {
            if let Err(e) = self.commit(vec![prepared], ctx).await {
                if let Some((key_ref, _, _)) = &wrapped {
                    self.discard_keys(std::iter::once(key_ref.as_str())).await;
                }
                return Err(e);
            }
        }

        let secret = match wrapped {
            Some((key_ref, _, envelope)) => FetchedSecret::Wrapped { key_ref, envelope },
            None => FetchedSecret::Plain(plaintext),
        };

        Ok(RouteOutcome::Fetched(SecretFetch {
            item_id: local.id.clone(),
            tier: local.tier,
            secret,
            expires_at: self.expiry.deadline(&local.id),
        }))
    }

    async fn add_data(&self, action: &PullRequestAction, ctx: &RouteContext<'_>) -> Result<RouteOutcome> {
        match action.status {
            ActionStatus::AddedInAnotherVault => {
                let item_id = action
                    .data
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Ok(RouteOutcome::AddedElsewhere { item_id })
            }
            ActionStatus::AddedInT1 => {
                let mut data: ItemData = parse_data(action)?;
                if data.secret.is_some() {
                    return Err(wrong_tier(&data.id, "T1 items carry no secret"));
                }
                data.tier = SecurityTier::T1;
                let item_id = data.id.clone();
                self.upsert(vec![data], false, ctx).await?;
                Ok(RouteOutcome::MetadataOnly { item_id })
            }
            _ => {
                let data: ItemData = parse_data(action)?;
                let item_ids = vec![data.id.clone()];
                self.upsert(vec![data], false, ctx).await?;
                Ok(RouteOutcome::Saved { item_ids })
            }
        }
    }

    async fn update_data(&self, data: ItemData, ctx: &RouteContext<'_>) -> Result<RouteOutcome> {
        let item_ids = vec![data.id.clone()];
        self.upsert(vec![data], true, ctx).await?;
        Ok(RouteOutcome::Saved { item_ids })
    }

    async fn delete_data(&self, data: DeleteItemData, ctx: &RouteContext<'_>) -> Result<RouteOutcome> {
        let ids = vec![data.item_id.clone()];
        let keys = self.vault.get_items_keys(&ids).await?;

        ctx.cancel.check()?;
        self.vault.remove_items(&ids).await?;
        self.expiry.cancel(&data.item_id);
        self.discard_keys(keys.iter().map(|k| k.key_ref.as_str())).await;

        Ok(RouteOutcome::Deleted { item_id: data.item_id })
    }

    // ========================================================================
    // Подготовка и запись
    // ========================================================================

    async fn existing(&self, ids: &[String]) -> Result<HashMap<String, (StoredItem, Option<ItemKeyRef>)>> {
        let mut keys: HashMap<String, ItemKeyRef> = self
            .vault
            .get_items_keys(ids)
            .await?
            .into_iter()
            .map(|k| (k.item_id.clone(), k))
            .collect();

        Ok(self
            .vault
            .get_items(ids)
            .await?
            .into_iter()
            .map(|item| {
                let key = keys.remove(&item.id);
                (item.id.clone(), (item, key))
            })
            .collect())
    }

    /// Перечитать текущие записи и заменить их целиком.
    /// Возвращает (добавленные, обновлённые).
    async fn upsert(
        &self,
        items: Vec<ItemData>,
        must_exist: bool,
        ctx: &RouteContext<'_>,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        let existing = self.existing(&ids).await?;

        let mut prepared = Vec::with_capacity(items.len());
        for item in &items {
            let current = existing.get(&item.id);
            if must_exist && current.is_none() {
                return Err(PairingError::MissingItem(item.id.clone()));
            }
            let (stored, key) = current
                .map(|(s, k)| (Some(s), k.as_ref()))
                .unwrap_or((None, None));
            prepared.push(self.prepare_item(item, stored, key, ctx)?);
        }

        let mut added = Vec::new();
        let mut updated = Vec::new();
        for entry in &prepared {
            if entry.existed {
                updated.push(entry.item.id.clone());
            } else {
                added.push(entry.item.id.clone());
            }
        }

        self.commit(prepared, ctx).await?;
        Ok((added, updated))
    }

    fn prepare_item(
        &self,
        data: &ItemData,
        existing: Option<&StoredItem>,
        existing_key: Option<&ItemKeyRef>,
        ctx: &RouteContext<'_>,
    ) -> Result<PreparedItem> {
        if data.id.is_empty() {
            return Err(PairingError::Validation("Item id is empty".to_string()));
        }

        let mut item = StoredItem {
            id: data.id.clone(),
            vault_id: data.vault_id.clone(),
            tier: data.tier,
            metadata: data.metadata.clone(),
            ciphertext: None,
            key_ref: None,
            updated_at: ctx.now,
        };

        let key = match (&data.secret, data.tier) {
            (Some(_), SecurityTier::T1) => {
                return Err(wrong_tier(&data.id, "T1 items carry no secret"));
            }
            (Some(secret), tier) => {
                let plaintext = self.decrypt_item_secret(&data.id, tier, secret, ctx)?;
                let (ciphertext, key_ref, local_key) = self.reencrypt(&data.id, tier, &plaintext, ctx)?;
                item.ciphertext = Some(ciphertext);
                item.key_ref = Some(key_ref.key_ref.clone());
                Some((key_ref, local_key))
            }
            (None, _) => None,
        };

        Ok(PreparedItem {
            item,
            key,
            superseded: existing_key.map(|k| k.key_ref.clone()),
            existed: existing.is_some(),
        })
    }

    fn decrypt_item_secret(
        &self,
        item_id: &str,
        tier: SecurityTier,
        secret: &str,
        ctx: &RouteContext<'_>,
    ) -> Result<SecretBytes> {
        let item_key = PairingKeys::derive_item_key(ctx.hkdf_key, tier, item_id)?;

        ctx.cancel.check()?;
        let plaintext = PairingCipher::open_b64(&item_key, secret, Some(item_id.as_bytes()))
            .map_err(|e| PairingError::DecryptionFailure(format!("Item {}: {}", item_id, e)))?;
        ctx.cancel.check()?;

        Ok(SecretBytes::new(plaintext))
    }

    /// Перешифровать под свежим локальным ключом
    fn reencrypt(
        &self,
        item_id: &str,
        tier: SecurityTier,
        plaintext: &SecretBytes,
        ctx: &RouteContext<'_>,
    ) -> Result<(Vec<u8>, ItemKeyRef, AesKey)> {
        let local_key = PairingKeys::random_key();
        let ciphertext = PairingCipher::seal(&local_key, plaintext.as_bytes(), Some(item_id.as_bytes()))?;
        let key_ref = ItemKeyRef {
            item_id: item_id.to_string(),
            key_ref: crate::utils::uuid::item_key_ref(),
            tier,
            created_at: ctx.now,
        };
        Ok((ciphertext, key_ref, local_key))
    }

    /// Одна запись: ключи, затем элементы. При ошибке новые ключи удаляются.
    async fn commit(&self, prepared: Vec<PreparedItem>, ctx: &RouteContext<'_>) -> Result<()> {
        use tracing::{debug, warn};

        ctx.cancel.check()?;

        let mut written: Vec<String> = Vec::new();
        let mut items = Vec::with_capacity(prepared.len());
        let mut key_refs = Vec::new();
        let mut superseded = Vec::new();
        let mut schedule = Vec::new();

        for entry in prepared {
            if let Some((key_ref, local_key)) = &entry.key {
                if let Err(e) = self
                    .session_store
                    .set(&key_ref.key_ref, local_key.as_bytes().to_vec())
                    .await
                {
                    self.discard_keys(written.iter().map(String::as_str)).await;
                    return Err(e);
                }
                written.push(key_ref.key_ref.clone());
                key_refs.push(key_ref.clone());
            }
            if let Some(old) = entry.superseded {
                superseded.push(old);
            }
            schedule.push((
                entry.item.id.clone(),
                entry.item.tier.expires() && entry.item.ciphertext.is_some(),
            ));
            items.push(entry.item);
        }

        if let Err(e) = self.vault.save_items(items, key_refs).await {
            warn!(target: "api::router", error = %e, "Vault write failed, discarding new keys");
            self.discard_keys(written.iter().map(String::as_str)).await;
            return Err(e);
        }

        // Старые ключи больше не нужны
        self.discard_keys(superseded.iter().map(String::as_str)).await;

        for (item_id, expires) in schedule {
            if expires {
                let deadline = self.expiry.schedule(&item_id, ctx.now);
                debug!(target: "api::router", item_id = %item_id, deadline, "T2 expiry armed");
            } else {
                self.expiry.cancel(&item_id);
            }
        }
        Ok(())
    }

    async fn discard_keys<'a>(&self, refs: impl Iterator<Item = &'a str>) {
        use tracing::warn;

        for key_ref in refs {
            if let Err(e) = self.session_store.remove(key_ref).await {
                warn!(target: "api::router", key_ref = %key_ref, error = %e, "Failed to remove key");
            }
        }
    }
}

/// Забрать ключ перешифровки: он читается один раз и сразу удаляется
pub async fn consume_transport_key(session_store: &dyn SessionStore, key_ref: &str) -> Result<SecretBytes> {
    if !key_ref.starts_with(TRANSPORT_KEY_PREFIX) {
        return Err(PairingError::Validation(format!(
            "Not a transport key reference: {}",
            key_ref
        )));
    }
    let key = session_store
        .get(key_ref)
        .await?
        .ok_or_else(|| PairingError::MissingItem(key_ref.to_string()))?;
    session_store.remove(key_ref).await?;
    Ok(SecretBytes::new(key))
}

/// Открытый секрет; для перешифрованного ключ при этом удаляется
pub async fn reveal_secret(session_store: &dyn SessionStore, fetch: &SecretFetch) -> Result<SecretBytes> {
    match &fetch.secret {
        FetchedSecret::Plain(bytes) => Ok(bytes.clone()),
        FetchedSecret::Wrapped { key_ref, envelope } => {
            let key = consume_transport_key(session_store, key_ref).await?;
            let plaintext = PairingCipher::open(&key, envelope, Some(fetch.item_id.as_bytes()))?;
            Ok(SecretBytes::new(plaintext))
        }
    }
}

fn parse_data<T: DeserializeOwned>(action: &PullRequestAction) -> Result<T> {
    serde_json::from_value(action.data.clone()).map_err(|e| {
        PairingError::Validation(format!("Invalid {} data: {}", action.action, e))
    })
}

fn wrong_tier(item_id: &str, reason: &str) -> PairingError {
    PairingError::WrongTier {
        item_id: item_id.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemorySessionStore, MemoryVaultStore};
    use serde_json::json;

    struct Fixture {
        router: RequestRouter,
        vault: Arc<MemoryVaultStore>,
        store: Arc<MemorySessionStore>,
        hkdf: HkdfKey,
        cancel: CancelSignal,
    }

    impl Fixture {
        fn new(rewrap: bool) -> Self {
            let vault = Arc::new(MemoryVaultStore::new());
            let store = Arc::new(MemorySessionStore::new());
            let router = RequestRouter::new(store.clone(), vault.clone(), ExpiryScheduler::with_ttl(1_000))
                .with_rewrap(rewrap);

            let a = PairingKeys::generate_ephemeral().unwrap();
            let b = PairingKeys::generate_ephemeral().unwrap();
            let shared = PairingKeys::derive_shared_secret(a.private_key(), b.public_key()).unwrap();
            let hkdf = PairingKeys::derive_session_key(&[7u8; 32], &shared).unwrap();

            Self {
                router,
                vault,
                store,
                hkdf,
                cancel: CancelSignal::new(),
            }
        }

        fn ctx(&self) -> RouteContext<'_> {
            RouteContext {
                hkdf_key: &self.hkdf,
                cancel: &self.cancel,
                now: 10_000,
            }
        }

        fn seal(&self, tier: SecurityTier, item_id: &str, secret: &[u8]) -> String {
            let key = PairingKeys::derive_item_key(&self.hkdf, tier, item_id).unwrap();
            PairingCipher::seal_b64(&key, secret, Some(item_id.as_bytes())).unwrap()
        }

        async fn seed(&self, id: &str, tier: SecurityTier) {
            let item = StoredItem {
                id: id.to_string(),
                vault_id: None,
                tier,
                metadata: json!({"title": id}),
                ciphertext: None,
                key_ref: None,
                updated_at: 0,
            };
            self.vault.save_items(vec![item], Vec::new()).await.unwrap();
        }
    }

    fn action(kind: PullRequestKind, status: ActionStatus, data: serde_json::Value) -> PullRequestAction {
        PullRequestAction {
            action: kind,
            status,
            data,
        }
    }

    #[tokio::test]
    async fn test_sif_request_t2_caches_without_plaintext() {
        let fx = Fixture::new(false);
        fx.seed("item-1", SecurityTier::T2).await;

        let secret = fx.seal(SecurityTier::T2, "item-1", b"hunter2");
        let request = action(
            PullRequestKind::SifRequest,
            ActionStatus::Accept,
            json!({"itemId": "item-1", "tier": "T2", "secret": secret}),
        );

        let outcome = fx.router.route(&request, &fx.ctx()).await.unwrap();
        let RouteOutcome::Fetched(fetch) = outcome else {
            panic!("expected fetched secret");
        };
        assert_eq!(fetch.secret, FetchedSecret::Plain(SecretBytes::new(b"hunter2".to_vec())));
        assert_eq!(fetch.expires_at, Some(11_000));

        let stored = fx.vault.item("item-1").unwrap();
        let ciphertext = stored.ciphertext.unwrap();
        assert!(!ciphertext.windows(7).any(|w| w == b"hunter2"));

        let key_ref = fx.vault.item_key("item-1").unwrap().key_ref;
        assert!(fx.store.contains(&key_ref));
        assert!(fx.router.expiry().is_scheduled("item-1"));
    }

    #[tokio::test]
    async fn test_sif_request_t3_not_cached_and_rewrapped() {
        let fx = Fixture::new(true);
        fx.seed("item-3", SecurityTier::T3).await;

        let secret = fx.seal(SecurityTier::T3, "item-3", b"pin");
        let request = action(
            PullRequestKind::SifRequest,
            ActionStatus::Accept,
            json!({"itemId": "item-3", "tier": "T3", "secret": secret}),
        );

        let outcome = fx.router.route(&request, &fx.ctx()).await.unwrap();
        let RouteOutcome::Fetched(fetch) = outcome else {
            panic!("expected fetched secret");
        };
        let FetchedSecret::Wrapped { key_ref, envelope } = fetch.secret else {
            panic!("expected wrapped secret");
        };
        assert!(key_ref.starts_with(TRANSPORT_KEY_PREFIX));

        let key = SecretBytes::new(fx.store.get(&key_ref).await.unwrap().unwrap());
        let plain = PairingCipher::open(&key, &envelope, Some(&b"item-3"[..])).unwrap();
        assert_eq!(plain, b"pin");

        assert!(fx.vault.item("item-3").unwrap().ciphertext.is_none());
        assert!(!fx.router.expiry().is_scheduled("item-3"));
    }

    #[tokio::test]
    async fn test_sif_request_errors() {
        let fx = Fixture::new(false);
        fx.seed("t1", SecurityTier::T1).await;
        fx.seed("t2", SecurityTier::T2).await;

        let missing = action(
            PullRequestKind::SifRequest,
            ActionStatus::Accept,
            json!({"itemId": "nope", "tier": "T2", "secret": ""}),
        );
        assert!(matches!(
            fx.router.route(&missing, &fx.ctx()).await,
            Err(PairingError::MissingItem(_))
        ));

        let t1 = action(
            PullRequestKind::SifRequest,
            ActionStatus::Accept,
            json!({"itemId": "t1", "tier": "T2", "secret": ""}),
        );
        assert!(matches!(
            fx.router.route(&t1, &fx.ctx()).await,
            Err(PairingError::WrongTier { .. })
        ));

        let mismatch = action(
            PullRequestKind::SifRequest,
            ActionStatus::Accept,
            json!({"itemId": "t2", "tier": "T3", "secret": fx.seal(SecurityTier::T3, "t2", b"x")}),
        );
        assert!(matches!(
            fx.router.route(&mismatch, &fx.ctx()).await,
            Err(PairingError::WrongTier { .. })
        ));

        let garbage = action(
            PullRequestKind::SifRequest,
            ActionStatus::Accept,
            json!({"itemId": "t2", "tier": "T2", "secret": fx.seal(SecurityTier::T3, "t2", b"x")}),
        );
        assert!(matches!(
            fx.router.route(&garbage, &fx.ctx()).await,
            Err(PairingError::DecryptionFailure(_))
        ));
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_status_is_declined() {
        let fx = Fixture::new(false);
        let request = action(PullRequestKind::AddData, ActionStatus::Cancel, json!(null));
        let outcome = fx.router.route(&request, &fx.ctx()).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Declined { kind: PullRequestKind::AddData });
        assert_eq!(fx.vault.write_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_status_rejected() {
        let fx = Fixture::new(false);
        let request = action(PullRequestKind::UpdateData, ActionStatus::Added, json!({}));
        assert!(matches!(
            fx.router.route(&request, &fx.ctx()).await,
            Err(PairingError::InvalidAction(_))
        ));
    }

    #[tokio::test]
    async fn test_add_then_update_replaces_key() {
        let fx = Fixture::new(false);
        let add = action(
            PullRequestKind::AddData,
            ActionStatus::Added,
            json!({
                "id": "item-1",
                "tier": "T2",
                "metadata": {"title": "Mail"},
                "secret": fx.seal(SecurityTier::T2, "item-1", b"one"),
            }),
        );
        let outcome = fx.router.route(&add, &fx.ctx()).await.unwrap();
        assert_eq!(outcome, RouteOutcome::Saved { item_ids: vec!["item-1".to_string()] });
        let first_key = fx.vault.item_key("item-1").unwrap().key_ref;

        let update = action(
            PullRequestKind::UpdateData,
            ActionStatus::Updated,
            json!({
                "id": "item-1",
                "tier": "T2",
                "metadata": {"title": "Mail 2"},
                "secret": fx.seal(SecurityTier::T2, "item-1", b"two"),
            }),
        );
        fx.router.route(&update, &fx.ctx()).await.unwrap();

        let second_key = fx.vault.item_key("item-1").unwrap().key_ref;
        assert_ne!(first_key, second_key);
        assert!(!fx.store.contains(&first_key));
        assert!(fx.store.contains(&second_key));
        assert_eq!(fx.vault.item("item-1").unwrap().metadata["title"], "Mail 2");
        assert!(fx.router.expiry().is_scheduled("item-1"));
    }

    #[tokio::test]
    async fn test_update_missing_item() {
        let fx = Fixture::new(false);
        let update = action(
            PullRequestKind::UpdateData,
            ActionStatus::Updated,
            json!({"id": "ghost", "tier": "T3"}),
        );
        assert!(matches!(
            fx.router.route(&update, &fx.ctx()).await,
            Err(PairingError::MissingItem(_))
        ));
    }

    #[tokio::test]
    async fn test_added_in_t1_keeps_metadata_only() {
        let fx = Fixture::new(false);
        let add = action(
            PullRequestKind::AddData,
            ActionStatus::AddedInT1,
            json!({"id": "note", "tier": "T2", "metadata": {"title": "Note"}}),
        );
        let outcome = fx.router.route(&add, &fx.ctx()).await.unwrap();
        assert_eq!(outcome, RouteOutcome::MetadataOnly { item_id: "note".to_string() });

        let stored = fx.vault.item("note").unwrap();
        assert_eq!(stored.tier, SecurityTier::T1);
        assert!(stored.ciphertext.is_none());
        assert!(fx.store.is_empty());

        let with_secret = action(
            PullRequestKind::AddData,
            ActionStatus::AddedInT1,
            json!({"id": "bad", "tier": "T1", "secret": "AAAA"}),
        );
        assert!(matches!(
            fx.router.route(&with_secret, &fx.ctx()).await,
            Err(PairingError::WrongTier { .. })
        ));
    }

    #[tokio::test]
    async fn test_added_elsewhere_persists_nothing() {
        let fx = Fixture::new(false);
        let add = action(
            PullRequestKind::AddData,
            ActionStatus::AddedInAnotherVault,
            json!({"id": "x"}),
        );
        let outcome = fx.router.route(&add, &fx.ctx()).await.unwrap();
        assert_eq!(outcome, RouteOutcome::AddedElsewhere { item_id: Some("x".to_string()) });
        assert_eq!(fx.vault.write_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_keys() {
        let fx = Fixture::new(false);
        fx.vault.set_fail_writes(true);

        let add = action(
            PullRequestKind::AddData,
            ActionStatus::Added,
            json!({
                "id": "item-1",
                "tier": "T2",
                "secret": fx.seal(SecurityTier::T2, "item-1", b"one"),
            }),
        );
        assert!(matches!(
            fx.router.route(&add, &fx.ctx()).await,
            Err(PairingError::Storage(_))
        ));
        assert!(fx.store.is_empty());
        assert!(fx.vault.item("item-1").is_none());
        assert!(!fx.router.expiry().is_scheduled("item-1"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let fx = Fixture::new(false);
        let add = action(
            PullRequestKind::AddData,
            ActionStatus::Added,
            json!({
                "id": "item-1",
                "tier": "T2",
                "secret": fx.seal(SecurityTier::T2, "item-1", b"one"),
            }),
        );
        fx.router.route(&add, &fx.ctx()).await.unwrap();

        let delete = action(
            PullRequestKind::DeleteData,
            ActionStatus::Accept,
            json!({"itemId": "item-1"}),
        );
        for _ in 0..2 {
            let outcome = fx.router.route(&delete, &fx.ctx()).await.unwrap();
            assert_eq!(outcome, RouteOutcome::Deleted { item_id: "item-1".to_string() });
        }
        assert!(fx.vault.item("item-1").is_none());
        assert!(fx.store.is_empty());
        assert!(!fx.router.expiry().is_scheduled("item-1"));
    }

    #[tokio::test]
    async fn test_full_sync_single_commit() {
        let fx = Fixture::new(false);
        fx.seed("old", SecurityTier::T3).await;
        let writes_before = fx.vault.write_count();

        let payload = serde_json::to_vec(&json!({
            "items": [
                {"id": "old", "tier": "T3", "secret": fx.seal(SecurityTier::T3, "old", b"a")},
                {"id": "new", "tier": "T1", "metadata": {"title": "n"}},
            ]
        }))
        .unwrap();

        let outcome = fx.router.route_full_sync(&payload, &fx.ctx()).await.unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Synced {
                added: vec!["new".to_string()],
                updated: vec!["old".to_string()],
            }
        );
        assert_eq!(fx.vault.write_count(), writes_before + 1);
    }

    #[tokio::test]
    async fn test_full_sync_bad_item_writes_nothing() {
        let fx = Fixture::new(false);
        let payload = serde_json::to_vec(&json!({
            "items": [
                {"id": "a", "tier": "T2", "secret": fx.seal(SecurityTier::T2, "a", b"a")},
                {"id": "b", "tier": "T2", "secret": "bm90IGEgY2lwaGVydGV4dA=="},
            ]
        }))
        .unwrap();

        assert!(fx.router.route_full_sync(&payload, &fx.ctx()).await.is_err());
        assert_eq!(fx.vault.item_count(), 0);
        assert!(fx.store.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_commit() {
        let fx = Fixture::new(false);
        fx.cancel.cancel();
        let add = action(
            PullRequestKind::AddData,
            ActionStatus::Added,
            json!({"id": "item-1", "tier": "T3"}),
        );
        assert!(matches!(
            fx.router.route(&add, &fx.ctx()).await,
            Err(PairingError::Cancelled)
        ));
        assert_eq!(fx.vault.item_count(), 0);
    }
}
