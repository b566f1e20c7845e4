// Автоочистка кэша T2
// item_id -> deadline (ms). Повторное планирование сбрасывает срок и перезапускает таймер.

use crate::protocol::transport::{Timer, TimerTask};
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::Result;
use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    deadline: i64,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl Entry {
    fn disarm(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Slots {
    entries: HashMap<String, Entry>,
    generation: u64,
}

/// Таймер и хранилища для очистки без участия вызывающего
#[derive(Clone)]
struct Runtime {
    timer: Arc<dyn Timer>,
    vault: Arc<dyn VaultStore>,
    session_store: Arc<dyn SessionStore>,
}

#[derive(Clone, Default)]
pub struct ExpiryScheduler {
    slots: Arc<Mutex<Slots>>,
    ttl_ms: Option<i64>,
    runtime: Option<Runtime>,
}

impl ExpiryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Планировщик с явным сроком жизни вместо конфигурации
    pub fn with_ttl(ttl_ms: i64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            ..Self::default()
        }
    }

    /// Каждый срок получает свой таймер, который сам очищает элемент.
    /// Без этого очистка идёт только через `purge_due`.
    pub fn armed(
        mut self,
        timer: Arc<dyn Timer>,
        vault: Arc<dyn VaultStore>,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        self.runtime = Some(Runtime {
            timer,
            vault,
            session_store,
        });
        self
    }

    fn ttl(&self) -> i64 {
        self.ttl_ms
            .unwrap_or_else(|| crate::config::Config::global().t2_expiry_ms())
    }

    /// Запланировать очистку; старый срок и его таймер заменяются
    pub fn schedule(&self, item_id: &str, now: i64) -> i64 {
        let ttl = self.ttl();
        let deadline = now + ttl;

        let mut slots = self.slots.lock();
        slots.generation += 1;
        let generation = slots.generation;
        let timer = self.arm(item_id, generation, ttl);

        let entry = Entry {
            deadline,
            generation,
            timer,
        };
        if let Some(previous) = slots.entries.insert(item_id.to_string(), entry) {
            previous.disarm();
        }
        deadline
    }

    pub fn cancel(&self, item_id: &str) -> bool {
        match self.slots.lock().entries.remove(item_id) {
            Some(entry) => {
                entry.disarm();
                true
            }
            None => false,
        }
    }

    pub fn deadline(&self, item_id: &str) -> Option<i64> {
        self.slots.lock().entries.get(item_id).map(|e| e.deadline)
    }

    pub fn is_scheduled(&self, item_id: &str) -> bool {
        self.slots.lock().entries.contains_key(item_id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().entries.is_empty()
    }

    /// Идентификаторы с истёкшим сроком
    pub fn due(&self, now: i64) -> Vec<String> {
        self.due_entries(now).into_iter().map(|(id, _)| id).collect()
    }

    fn due_entries(&self, now: i64) -> Vec<(String, u64)> {
        let mut due: Vec<(String, u64)> = self
            .slots
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, entry)| (id.clone(), entry.generation))
            .collect();
        due.sort();
        due
    }

    /// Удалить закэшированный шифртекст и ключи истёкших элементов.
    /// Метаданные элемента остаются.
    pub async fn purge_due(
        &self,
        now: i64,
        vault: &dyn VaultStore,
        session_store: &dyn SessionStore,
    ) -> Result<Vec<String>> {
        let due = self.due_entries(now);
        if due.is_empty() {
            return Ok(Vec::new());
        }
        self.purge(due, now, vault, session_store).await
    }

    async fn purge(
        &self,
        targets: Vec<(String, u64)>,
        now: i64,
        vault: &dyn VaultStore,
        session_store: &dyn SessionStore,
    ) -> Result<Vec<String>> {
        use tracing::info;

        let ids: Vec<String> = targets.iter().map(|(id, _)| id.clone()).collect();
        let keys = vault.get_items_keys(&ids).await?;
        let items = vault.get_items(&ids).await?;

        let purged: Vec<_> = items
            .into_iter()
            .map(|mut item| {
                item.ciphertext = None;
                item.key_ref = None;
                item.updated_at = now;
                item
            })
            .collect();
        vault.save_items(purged, Vec::new()).await?;

        // Ключи удаляем только после того, как элементы перестали на них ссылаться
        for key in keys {
            session_store.remove(&key.key_ref).await?;
        }

        {
            // Срок, назначенный заново во время очистки, остаётся в силе
            let mut slots = self.slots.lock();
            for (id, generation) in &targets {
                if slots.entries.get(id).map(|e| e.generation) == Some(*generation) {
                    if let Some(entry) = slots.entries.remove(id) {
                        entry.disarm();
                    }
                }
            }
        }

        info!(target: "api::expiry", count = ids.len(), "Purged expired T2 secrets");
        Ok(ids)
    }

    fn arm(&self, item_id: &str, generation: u64, ttl: i64) -> Option<AbortHandle> {
        use tracing::warn;

        let runtime = self.runtime.clone()?;
        let (handle, registration) = AbortHandle::new_pair();

        let scheduler = self.clone();
        let timer = runtime.timer.clone();
        let id = item_id.to_string();
        let delay = ttl.max(0) as u64;
        let fire = async move {
            runtime.timer.sleep(delay).await;
            scheduler.fire(&id, generation, &runtime).await;
        };
        let task: TimerTask = Box::pin(async move {
            let _ = Abortable::new(fire, registration).await;
        });

        if timer.spawn(task) {
            Some(handle)
        } else {
            warn!(
                target: "api::expiry",
                item_id = %item_id,
                "No executor for the expiry timer, waiting for an explicit purge"
            );
            None
        }
    }

    async fn fire(&self, item_id: &str, generation: u64, runtime: &Runtime) {
        use tracing::{debug, warn};

        let current = self.slots.lock().entries.get(item_id).map(|e| e.generation) == Some(generation);
        if !current {
            return;
        }

        debug!(target: "api::expiry", item_id = %item_id, "Expiry timer fired");
        let now = runtime.timer.now_millis();
        let targets = vec![(item_id.to_string(), generation)];
        if let Err(e) = self
            .purge(targets, now, runtime.vault.as_ref(), runtime.session_store.as_ref())
            .await
        {
            warn!(target: "api::expiry", item_id = %item_id, error = %e, "Scheduled purge failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::TokioTimer;
    use crate::storage::memory::{MemorySessionStore, MemoryVaultStore};
    use crate::storage::models::{ItemKeyRef, SecurityTier, StoredItem};
    use std::time::Duration;

    async fn cached(vault: &MemoryVaultStore, store: &MemorySessionStore, id: &str) -> String {
        let key_ref = format!("ik:{}", id);
        let item = StoredItem {
            id: id.to_string(),
            vault_id: None,
            tier: SecurityTier::T2,
            metadata: serde_json::json!({ "title": id }),
            ciphertext: Some(vec![9; 16]),
            key_ref: Some(key_ref.clone()),
            updated_at: 0,
        };
        let key = ItemKeyRef {
            item_id: id.to_string(),
            key_ref: key_ref.clone(),
            tier: SecurityTier::T2,
            created_at: 0,
        };
        vault.save_items(vec![item], vec![key]).await.unwrap();
        store.set(&key_ref, vec![1; 32]).await.unwrap();
        key_ref
    }

    fn armed(ttl: i64) -> (ExpiryScheduler, Arc<MemoryVaultStore>, Arc<MemorySessionStore>) {
        let vault = Arc::new(MemoryVaultStore::new());
        let store = Arc::new(MemorySessionStore::new());
        let scheduler = ExpiryScheduler::with_ttl(ttl).armed(Arc::new(TokioTimer), vault.clone(), store.clone());
        (scheduler, vault, store)
    }

    #[test]
    fn test_reschedule_resets_deadline() {
        let scheduler = ExpiryScheduler::with_ttl(1_000);
        assert_eq!(scheduler.schedule("a", 0), 1_000);
        assert_eq!(scheduler.schedule("a", 500), 1_500);
        assert_eq!(scheduler.len(), 1);

        assert!(scheduler.due(1_000).is_empty());
        assert_eq!(scheduler.due(1_500), vec!["a".to_string()]);
    }

    #[test]
    fn test_cancel() {
        let scheduler = ExpiryScheduler::with_ttl(10);
        scheduler.schedule("a", 0);
        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_default_ttl_from_config() {
        let scheduler = ExpiryScheduler::new();
        assert_eq!(scheduler.schedule("a", 0), 3 * 60 * 1000);
    }

    #[test]
    fn test_armed_outside_runtime_keeps_deadline() {
        let (scheduler, _, _) = armed(1_000);
        assert_eq!(scheduler.schedule("a", 0), 1_000);
        assert_eq!(scheduler.due(1_000), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_purges_without_caller() {
        let (scheduler, vault, store) = armed(1_000);
        let key_ref = cached(&vault, &store, "mail").await;

        scheduler.schedule("mail", 0);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        let item = vault.item("mail").unwrap();
        assert!(item.ciphertext.is_none());
        assert_eq!(item.metadata["title"], "mail");
        assert!(!store.contains(&key_ref));
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let (scheduler, vault, store) = armed(1_000);
        let key_ref = cached(&vault, &store, "mail").await;

        scheduler.schedule("mail", 0);
        tokio::time::sleep(Duration::from_millis(600)).await;
        scheduler.schedule("mail", 600);

        // Первый таймер истёк бы здесь
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(vault.item("mail").unwrap().ciphertext.is_some());
        assert!(store.contains(&key_ref));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(vault.item("mail").unwrap().ciphertext.is_none());
        assert!(!store.contains(&key_ref));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_timer() {
        let (scheduler, vault, store) = armed(1_000);
        cached(&vault, &store, "card").await;

        scheduler.schedule("card", 0);
        assert!(scheduler.cancel("card"));
        tokio::time::sleep(Duration::from_millis(5_000)).await;

        assert!(vault.item("card").unwrap().ciphertext.is_some());
    }
}
