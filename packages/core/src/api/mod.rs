// Публичный API: открытие QR-сессий, переподключение устройств, очистка кэша T2

pub mod devices;
pub mod expiry;
pub mod router;

use crate::api::devices::{DeviceBook, PushChannel, WakeRequest};
use crate::api::expiry::ExpiryScheduler;
use crate::config::Config;
use crate::crypto::keys::{EphemeralSession, PersistentIdentity, SecretBytes};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::{ActiveSuite, PairingKeys};
use crate::protocol::qr::QrPayload;
use crate::protocol::transport::{Timer, Transport};
use crate::state::events::{EventSink, SessionEvent};
use crate::state::registry::{CancelSignal, SocketLease, SocketRegistry};
use crate::state::session::{PairingSession, RequestContext, SessionDeps};
use crate::storage::models::Device;
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::{PairingError, Result};
use std::sync::Arc;

pub use router::{FetchedSecret, RequestRouter, RouteOutcome, SecretFetch};

/// Сессия, занявшая слот реестра, но ещё без сокета
#[derive(Debug)]
pub struct PreparedSession {
    pub qr: QrPayload,
    ephemeral_uuid: String,
    lease: SocketLease,
}

impl PreparedSession {
    pub fn session_id(&self) -> &str {
        self.lease.session_id()
    }

    /// base64 строка для QR-кода
    pub fn qr_string(&self) -> String {
        self.qr.encode()
    }

    pub fn relay_url(&self) -> String {
        PassConnect::relay_url(self.session_id())
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        self.lease.cancel_signal()
    }
}

/// Точка входа клиента сопряжения
pub struct PassConnect {
    registry: SocketRegistry,
    deps: SessionDeps,
    push: Option<Arc<dyn PushChannel>>,
}

impl PassConnect {
    pub fn new(
        session_store: Arc<dyn SessionStore>,
        vault: Arc<dyn VaultStore>,
        timer: Arc<dyn Timer>,
    ) -> Self {
        let expiry = ExpiryScheduler::new().armed(timer.clone(), vault.clone(), session_store.clone());
        Self {
            registry: SocketRegistry::new(),
            deps: SessionDeps {
                session_store,
                vault,
                timer,
                events: EventSink::disabled(),
                expiry,
            },
            push: None,
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.deps.events = events;
        self
    }

    /// Свой планировщик (например, с другим сроком); таймеры идут через таймер клиента
    pub fn with_expiry(mut self, expiry: ExpiryScheduler) -> Self {
        self.deps.expiry = expiry.armed(
            self.deps.timer.clone(),
            self.deps.vault.clone(),
            self.deps.session_store.clone(),
        );
        self
    }

    pub fn with_push(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn registry(&self) -> &SocketRegistry {
        &self.registry
    }

    pub fn expiry(&self) -> &ExpiryScheduler {
        &self.deps.expiry
    }

    /// URL relay для сессии
    pub fn relay_url(session_id: &str) -> String {
        format!("{}/{}", Config::global().relay_url.trim_end_matches('/'), session_id)
    }

    /// Новая сессия для показа QR. Занятый слот закрывается и запрос повторяется.
    pub async fn open_qr_session(&self) -> Result<PreparedSession> {
        let lease = self.acquire().await?;
        let (_, _, prepared) = self.prepare(lease).await?;

        self.deps.events.emit(SessionEvent::QrReady {
            session_id: prepared.session_id().to_string(),
            payload: prepared.qr_string(),
        });
        Ok(prepared)
    }

    /// Разбудить запомненное устройство push-запросом и подготовить сессию для него
    pub async fn reconnect_device(&self, device_id: &str) -> Result<PreparedSession> {
        use tracing::info;

        let push = self
            .push
            .clone()
            .ok_or_else(|| PairingError::Validation("Push channel is not configured".to_string()))?;
        let device = self.device_book().get(device_id).await?;

        let lease = self.acquire().await?;
        let (identity, ephemeral, prepared) = self.prepare(lease).await?;

        let request = WakeRequest::build(
            &device,
            prepared.session_id(),
            &identity,
            &ephemeral,
            self.deps.timer.now_millis(),
        )?;
        push.wake(&device, &request).await?;

        info!(
            target: "api",
            device_id = %device.id,
            session_id = %prepared.session_id(),
            "Wake request sent"
        );
        Ok(prepared)
    }

    /// Привязать сокет к подготовленной сессии
    pub fn attach(
        &self,
        prepared: PreparedSession,
        transport: Box<dyn Transport>,
        request: RequestContext,
    ) -> PairingSession {
        PairingSession::new(
            prepared.lease,
            prepared.ephemeral_uuid,
            transport,
            request,
            self.deps.clone(),
        )
    }

    /// Попросить живую сессию закрыться
    pub fn close_live(&self) -> bool {
        self.registry.close_live()
    }

    /// Очистить всё, что уже истекло. Таймеры делают это сами; вызов нужен,
    /// если исполнителя фоновых задач нет.
    pub async fn purge_expired(&self) -> Result<Vec<String>> {
        self.deps
            .expiry
            .purge_due(
                self.deps.timer.now_millis(),
                self.deps.vault.as_ref(),
                self.deps.session_store.as_ref(),
            )
            .await
    }

    /// Ключ перешифровки из `FetchedSecret::Wrapped`; повторно его не получить
    pub async fn consume_transport_key(&self, key_ref: &str) -> Result<SecretBytes> {
        router::consume_transport_key(self.deps.session_store.as_ref(), key_ref).await
    }

    /// Открыть полученный секрет, забрав его ключ перешифровки
    pub async fn reveal_secret(&self, fetch: &SecretFetch) -> Result<SecretBytes> {
        router::reveal_secret(self.deps.session_store.as_ref(), fetch).await
    }

    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.device_book().list().await
    }

    pub async fn forget_device(&self, device_id: &str) -> Result<()> {
        self.device_book()
            .forget_device(device_id, self.deps.session_store.as_ref())
            .await
    }

    fn device_book(&self) -> DeviceBook {
        DeviceBook::new(self.deps.vault.clone())
    }

    async fn acquire(&self) -> Result<SocketLease> {
        use tracing::warn;

        let config = Config::global();
        let attempts = config.instance_retry_attempts.max(1);

        for attempt in 1..=attempts {
            let session_id = hex::encode(ActiveSuite::random_bytes(config.session_id_length));
            match self.registry.acquire(&session_id, CancelSignal::new()) {
                Ok(lease) => return Ok(lease),
                Err(PairingError::InstanceExists) if attempt < attempts => {
                    warn!(
                        target: "api",
                        attempt,
                        live_session = ?self.registry.live_session_id(),
                        "Pairing session already live, closing it"
                    );
                    self.registry.close_live();
                    self.deps.timer.sleep(config.instance_retry_backoff_ms).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(PairingError::InstanceExists)
    }

    async fn prepare(
        &self,
        lease: SocketLease,
    ) -> Result<(PersistentIdentity, EphemeralSession, PreparedSession)> {
        let identity = PairingKeys::load_or_create_identity(self.deps.vault.as_ref()).await?;
        let ephemeral = PairingKeys::generate_ephemeral()?;
        PairingKeys::store_ephemeral(self.deps.session_store.as_ref(), &ephemeral).await?;

        let qr = QrPayload::build(Config::global().scheme, lease.session_id(), &identity, &ephemeral)?;
        let prepared = PreparedSession {
            qr,
            ephemeral_uuid: ephemeral.uuid.clone(),
            lease,
        };
        Ok((identity, ephemeral, prepared))
    }
}
