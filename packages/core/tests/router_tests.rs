//! Router scenarios across several requests against the in-memory stores

use passlink_core::api::expiry::ExpiryScheduler;
use passlink_core::api::router::{
    consume_transport_key, reveal_secret, FetchedSecret, RequestRouter, RouteContext, RouteOutcome,
};
use passlink_core::crypto::keys::{HkdfKey, SecretBytes};
use passlink_core::crypto::{PairingCipher, PairingKeys};
use passlink_core::protocol::messages::PullRequestAction;
use passlink_core::protocol::transport::TokioTimer;
use passlink_core::state::registry::CancelSignal;
use passlink_core::storage::memory::{MemorySessionStore, MemoryVaultStore};
use passlink_core::storage::models::{SecurityTier, StoredItem};
use passlink_core::storage::{SessionStore, VaultStore};
use passlink_core::PairingError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TTL_MS: i64 = 180_000;
const NOW: i64 = 1_700_000_000_000;

struct Setup {
    router: RequestRouter,
    vault: Arc<MemoryVaultStore>,
    store: Arc<MemorySessionStore>,
    hkdf: HkdfKey,
    cancel: CancelSignal,
}

impl Setup {
    fn new() -> Self {
        Self::build(|_, _| ExpiryScheduler::with_ttl(TTL_MS))
    }

    /// Истечение по настоящему таймеру (tokio)
    fn armed(ttl_ms: i64) -> Self {
        Self::build(|vault, store| {
            ExpiryScheduler::with_ttl(ttl_ms).armed(Arc::new(TokioTimer), vault, store)
        })
    }

    fn build(
        expiry: impl FnOnce(Arc<MemoryVaultStore>, Arc<MemorySessionStore>) -> ExpiryScheduler,
    ) -> Self {
        let vault = Arc::new(MemoryVaultStore::new());
        let store = Arc::new(MemorySessionStore::new());
        let scheduler = expiry(vault.clone(), store.clone());
        let router = RequestRouter::new(store.clone(), vault.clone(), scheduler).with_rewrap(true);

        let phone = PairingKeys::generate_ephemeral().unwrap();
        let browser = PairingKeys::generate_ephemeral().unwrap();
        let shared = PairingKeys::derive_shared_secret(phone.private_key(), browser.public_key()).unwrap();
        let hkdf = PairingKeys::derive_session_key(&[0x5au8; 32], &shared).unwrap();

        Self {
            router,
            vault,
            store,
            hkdf,
            cancel: CancelSignal::new(),
        }
    }

    fn ctx(&self, now: i64) -> RouteContext<'_> {
        RouteContext {
            hkdf_key: &self.hkdf,
            cancel: &self.cancel,
            now,
        }
    }

    fn seal(&self, tier: SecurityTier, item_id: &str, secret: &[u8]) -> String {
        let key = PairingKeys::derive_item_key(&self.hkdf, tier, item_id).unwrap();
        PairingCipher::seal_b64(&key, secret, Some(item_id.as_bytes())).unwrap()
    }

    async fn route(&self, action: serde_json::Value, now: i64) -> passlink_core::Result<RouteOutcome> {
        let action: PullRequestAction = serde_json::from_value(action).unwrap();
        self.router.route(&action, &self.ctx(now)).await
    }

    async fn seed(&self, id: &str, tier: SecurityTier) {
        let item = StoredItem {
            id: id.to_string(),
            vault_id: None,
            tier,
            metadata: json!({ "title": id }),
            ciphertext: None,
            key_ref: None,
            updated_at: 0,
        };
        self.vault.save_items(vec![item], Vec::new()).await.unwrap();
    }

    async fn fetch(&self, id: &str, tier: SecurityTier, secret: &[u8]) -> passlink_core::Result<RouteOutcome> {
        self.route(
            json!({
                "action": "sifRequest",
                "status": "accept",
                "data": { "itemId": id, "tier": tier, "secret": self.seal(tier, id, secret) },
            }),
            NOW,
        )
        .await
    }
}

/// Добавить T2 -> запросить -> истечь: метаданные остаются, секрет и ключ нет
#[tokio::test]
async fn test_t2_lifecycle() {
    let s = Setup::new();

    let added = s
        .route(
            json!({
                "action": "addData",
                "status": "added",
                "data": {
                    "id": "mail",
                    "tier": "T2",
                    "metadata": { "title": "Mail" },
                    "secret": s.seal(SecurityTier::T2, "mail", b"first"),
                },
            }),
            NOW,
        )
        .await
        .unwrap();
    assert_eq!(
        added,
        RouteOutcome::Saved {
            item_ids: vec!["mail".to_string()]
        }
    );
    assert_eq!(s.router.expiry().deadline("mail"), Some(NOW + TTL_MS));

    let later = NOW + 60_000;
    let fetched = s
        .route(
            json!({
                "action": "sifRequest",
                "status": "accept",
                "data": { "itemId": "mail", "tier": "T2", "secret": s.seal(SecurityTier::T2, "mail", b"second") },
            }),
            later,
        )
        .await
        .unwrap();

    let RouteOutcome::Fetched(fetch) = fetched else {
        panic!("expected a fetched secret");
    };
    // Повторный запрос продлевает срок
    assert_eq!(fetch.expires_at, Some(later + TTL_MS));

    let FetchedSecret::Wrapped { key_ref, envelope } = fetch.secret else {
        panic!("expected a wrapped secret");
    };
    let transport_key = SecretBytes::new(s.store.get(&key_ref).await.unwrap().unwrap());
    let secret = PairingCipher::open(&transport_key, &envelope, Some(&b"mail"[..])).unwrap();
    assert_eq!(secret, b"second");

    let item_key_ref = s.vault.item("mail").unwrap().key_ref.unwrap();
    assert!(s.store.contains(&item_key_ref));

    // До срока ничего не удаляется
    assert!(s
        .router
        .expiry()
        .purge_due(NOW + TTL_MS, s.vault.as_ref(), s.store.as_ref())
        .await
        .unwrap()
        .is_empty());

    let purged = s
        .router
        .expiry()
        .purge_due(later + TTL_MS, s.vault.as_ref(), s.store.as_ref())
        .await
        .unwrap();
    assert_eq!(purged, vec!["mail".to_string()]);

    let item = s.vault.item("mail").unwrap();
    assert_eq!(item.metadata["title"], "Mail");
    assert!(item.ciphertext.is_none());
    assert!(!s.store.contains(&item_key_ref));
    assert!(s.router.expiry().is_empty());
}

/// Переход T2 -> T3 снимает автоочистку
#[tokio::test]
async fn test_tier_change_cancels_expiry() {
    let s = Setup::new();

    s.route(
        json!({
            "action": "addData",
            "status": "added",
            "data": { "id": "card", "tier": "T2", "secret": s.seal(SecurityTier::T2, "card", b"4111") },
        }),
        NOW,
    )
    .await
    .unwrap();
    assert!(s.router.expiry().is_scheduled("card"));
    let old_key = s.vault.item("card").unwrap().key_ref.unwrap();

    s.route(
        json!({
            "action": "updateData",
            "status": "updated",
            "data": { "id": "card", "tier": "T3", "secret": s.seal(SecurityTier::T3, "card", b"4111") },
        }),
        NOW + 1,
    )
    .await
    .unwrap();

    let item = s.vault.item("card").unwrap();
    assert_eq!(item.tier, SecurityTier::T3);
    assert!(!s.router.expiry().is_scheduled("card"));
    assert!(!s.store.contains(&old_key));
    assert!(s.store.contains(item.key_ref.as_deref().unwrap()));
}

/// Удаление после добавления: ни элемента, ни ключа
#[tokio::test]
async fn test_add_then_delete_leaves_nothing() {
    let s = Setup::new();

    s.route(
        json!({
            "action": "addData",
            "status": "added",
            "data": { "id": "bank", "tier": "T3", "secret": s.seal(SecurityTier::T3, "bank", b"pin") },
        }),
        NOW,
    )
    .await
    .unwrap();
    assert_eq!(s.store.len(), 1);

    let outcome = s
        .route(
            json!({ "action": "deleteData", "status": "accept", "data": { "itemId": "bank" } }),
            NOW,
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RouteOutcome::Deleted {
            item_id: "bank".to_string()
        }
    );
    assert!(s.vault.item("bank").is_none());
    assert!(s.store.is_empty());
}

/// Секрет, запечатанный под ключом другого уровня, не принимается
#[tokio::test]
async fn test_secret_sealed_for_other_tier_is_rejected() {
    let s = Setup::new();

    let result = s
        .route(
            json!({
                "action": "addData",
                "status": "added",
                "data": { "id": "x", "tier": "T3", "secret": s.seal(SecurityTier::T2, "x", b"s") },
            }),
            NOW,
        )
        .await;

    assert!(matches!(result, Err(passlink_core::PairingError::DecryptionFailure(_))));
    assert_eq!(s.vault.item_count(), 0);
    assert!(s.store.is_empty());
}

/// Кэш T2 очищается сам по таймеру, без вызова purge
#[tokio::test(start_paused = true)]
async fn test_t2_cache_purged_by_timer() {
    let s = Setup::armed(1_000);

    s.route(
        json!({
            "action": "addData",
            "status": "added",
            "data": { "id": "mail", "tier": "T2", "secret": s.seal(SecurityTier::T2, "mail", b"first") },
        }),
        NOW,
    )
    .await
    .unwrap();
    let key_ref = s.vault.item("mail").unwrap().key_ref.unwrap();
    assert!(s.store.contains(&key_ref));

    tokio::time::sleep(Duration::from_millis(60_000)).await;

    let item = s.vault.item("mail").unwrap();
    assert!(item.ciphertext.is_none());
    assert!(!s.store.contains(&key_ref));
    assert!(s.router.expiry().is_empty());
}

/// Ключ перешифровки отдаётся один раз
#[tokio::test]
async fn test_transport_key_is_consumed_once() {
    let s = Setup::new();
    s.seed("bank", SecurityTier::T3).await;

    let RouteOutcome::Fetched(fetch) = s.fetch("bank", SecurityTier::T3, b"pin").await.unwrap() else {
        panic!("expected a fetched secret");
    };
    let FetchedSecret::Wrapped { key_ref, .. } = fetch.secret.clone() else {
        panic!("expected a wrapped secret");
    };
    assert!(s.store.contains(&key_ref));

    let secret = reveal_secret(s.store.as_ref(), &fetch).await.unwrap();
    assert_eq!(secret.as_bytes(), b"pin");
    assert!(s.store.is_empty());

    assert!(matches!(
        consume_transport_key(s.store.as_ref(), &key_ref).await,
        Err(PairingError::MissingItem(_))
    ));
    assert!(matches!(
        consume_transport_key(s.store.as_ref(), "ik:other").await,
        Err(PairingError::Validation(_))
    ));
}

/// Ключ перешифровки не записался: кэш T2 не обновляется и срок не назначается
#[tokio::test]
async fn test_fetch_with_failing_session_store_changes_nothing() {
    let s = Setup::new();
    s.seed("mail", SecurityTier::T2).await;
    s.store.set_fail_writes(true);

    let result = s.fetch("mail", SecurityTier::T2, b"secret").await;
    assert!(matches!(result, Err(PairingError::Storage(_))));

    let item = s.vault.item("mail").unwrap();
    assert!(item.ciphertext.is_none());
    assert!(item.key_ref.is_none());
    assert!(!s.router.expiry().is_scheduled("mail"));
    assert!(s.store.is_empty());
}

/// Кэш не записался: выданный ключ перешифровки тоже удаляется
#[tokio::test]
async fn test_fetch_with_failing_vault_discards_transport_key() {
    let s = Setup::new();
    s.seed("mail", SecurityTier::T2).await;
    s.vault.set_fail_writes(true);

    let result = s.fetch("mail", SecurityTier::T2, b"secret").await;
    assert!(matches!(result, Err(PairingError::Storage(_))));

    assert!(s.vault.item("mail").unwrap().ciphertext.is_none());
    assert!(!s.router.expiry().is_scheduled("mail"));
    assert!(s.store.is_empty());
}
