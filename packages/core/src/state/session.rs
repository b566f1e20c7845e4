//! Драйвер одной сессии сопряжения
//!
//! Владеет сокетом, конечным автоматом и ключами сессии. Ждёт одновременно
//! следующее событие сокета, watchdog бездействия и сигнал отмены. Любая
//! ошибка терминальна: пиру уходит CLOSE_WITH_ERROR (если он сам её не
//! сообщил), сокет закрывается, ключи стираются.

use crate::api::devices::DeviceBook;
use crate::api::expiry::ExpiryScheduler;
use crate::api::router::{FetchedSecret, RequestRouter, RouteContext, RouteOutcome};
use crate::config::Config;
use crate::crypto::keys::{AesKey, HkdfKey, KeyLabel};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::{ActiveSuite, PairingCipher, PairingKeys};
use crate::protocol::messages::{
    Action, ActionStatus, ChallengeRequest, EncryptedPayload, ErrorPayload, Frame, HelloPayload,
    InitTransferConfirmedPayload, InitTransferPayload, PullRequestAction, PullRequestCompletedPayload,
    PullRequestKind, PullRequestPayload, TransferChunkPayload,
};
use crate::protocol::transfer::ChunkAssembler;
use crate::protocol::transport::{CloseCode, Timer, Transport, TransportEvent};
use crate::protocol::{validation, wire};
use crate::state::events::{EventSink, SessionEvent};
use crate::state::machine::{SocketState, SocketStateMachine};
use crate::state::registry::{CancelSignal, SocketLease};
use crate::storage::models::{Device, SecurityTier};
use crate::storage::{SessionStore, VaultStore};
use crate::utils::error::{PairingError, Result};
use futures::future::{select, Either};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

/// Что клиент просит у пира в PULL_REQUEST
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub kind: PullRequestKind,
    pub data: serde_json::Value,
}

impl RequestContext {
    pub fn new(kind: PullRequestKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }

    pub fn sif_request(item_id: &str, tier: SecurityTier) -> Self {
        Self::new(
            PullRequestKind::SifRequest,
            json!({ "itemId": item_id, "tier": tier }),
        )
    }

    pub fn add_data(vault_id: Option<&str>) -> Self {
        Self::new(PullRequestKind::AddData, json!({ "vaultId": vault_id }))
    }

    pub fn update_data(item_id: &str) -> Self {
        Self::new(PullRequestKind::UpdateData, json!({ "itemId": item_id }))
    }

    pub fn delete_data(item_id: &str) -> Self {
        Self::new(PullRequestKind::DeleteData, json!({ "itemId": item_id }))
    }

    pub fn full_sync() -> Self {
        Self::new(PullRequestKind::FullSync, serde_json::Value::Null)
    }

    /// Ответ пира должен относиться к этому запросу и к этому же элементу
    pub fn check_response(&self, action: &PullRequestAction) -> Result<()> {
        if action.action != self.kind {
            return Err(PairingError::InvalidAction(format!(
                "Expected {} response, got {}",
                self.kind, action.action
            )));
        }
        if action.status == ActionStatus::Cancel {
            return Ok(());
        }

        // (поле в запросе, поле в ответе)
        let (requested_field, answered_field) = match self.kind {
            PullRequestKind::SifRequest | PullRequestKind::DeleteData => ("itemId", "itemId"),
            PullRequestKind::UpdateData => ("itemId", "id"),
            PullRequestKind::AddData => ("vaultId", "vaultId"),
            PullRequestKind::FullSync => return Ok(()),
        };
        let Some(requested) = self.data.get(requested_field).and_then(|v| v.as_str()) else {
            return Ok(());
        };
        let answered = action.data.get(answered_field).and_then(|v| v.as_str());

        let matches = match self.kind {
            // Элемент в другом vault или без vaultId: vault выбирает телефон
            PullRequestKind::AddData => {
                action.status == ActionStatus::AddedInAnotherVault
                    || answered.map_or(true, |id| id == requested)
            }
            _ => answered == Some(requested),
        };
        if !matches {
            return Err(PairingError::InvalidAction(format!(
                "{} response targets {}, requested {}",
                self.kind,
                answered.unwrap_or("nothing"),
                requested
            )));
        }
        Ok(())
    }
}

/// Общие зависимости всех сессий
#[derive(Clone)]
pub struct SessionDeps {
    pub session_store: Arc<dyn SessionStore>,
    pub vault: Arc<dyn VaultStore>,
    pub timer: Arc<dyn Timer>,
    pub events: EventSink,
    pub expiry: ExpiryScheduler,
}

/// Итог успешно закрытой сессии
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub session_id: String,
    pub device: Option<Device>,
    pub result: Option<RouteOutcome>,
}

/// Ключи, живущие только в памяти
struct SessionKeys {
    hkdf: HkdfKey,
    data: AesKey,
}

enum Wake {
    Event(Option<TransportEvent>),
    Timeout,
    Cancelled,
}

struct ActiveTransfer {
    init: InitTransferPayload,
    assembler: ChunkAssembler,
}

pub struct PairingSession {
    session_id: String,
    ephemeral_uuid: String,
    machine: SocketStateMachine,
    transport: Box<dyn Transport>,
    request: RequestContext,

    // Ключи до подтверждения CHALLENGE и после
    pending_keys: Option<SessionKeys>,
    keys: Option<SessionKeys>,
    salt_hex: Option<String>,

    device: Option<Device>,
    action_frame_id: Option<String>,
    transfer: Option<ActiveTransfer>,
    outcome: Option<RouteOutcome>,
    success: bool,

    deps: SessionDeps,
    devices: DeviceBook,
    router: RequestRouter,
    cancel: CancelSignal,
    _lease: SocketLease,
}

impl PairingSession {
    pub fn new(
        lease: SocketLease,
        ephemeral_uuid: String,
        transport: Box<dyn Transport>,
        request: RequestContext,
        deps: SessionDeps,
    ) -> Self {
        let router = RequestRouter::new(
            deps.session_store.clone(),
            deps.vault.clone(),
            deps.expiry.clone(),
        );
        Self {
            session_id: lease.session_id().to_string(),
            ephemeral_uuid,
            machine: SocketStateMachine::new(),
            transport,
            request,
            pending_keys: None,
            keys: None,
            salt_hex: None,
            device: None,
            action_frame_id: None,
            transfer: None,
            outcome: None,
            success: false,
            devices: DeviceBook::new(deps.vault.clone()),
            router,
            cancel: lease.cancel_signal().clone(),
            deps,
            _lease: lease,
        }
    }

    /// Заменить маршрутизатор (например, с другой политикой перешифровки)
    pub fn with_router(mut self, router: RequestRouter) -> Self {
        self.router = router;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SocketState {
        self.machine.state()
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Прогнать сессию до закрытия. Слот реестра освобождается на выходе.
    pub async fn run(mut self) -> Result<SessionOutcome> {
        use tracing::{info, warn};

        info!(
            target: "state::session",
            session_id = %self.session_id,
            request = %self.request.kind,
            "Pairing session started"
        );

        match self.drive().await {
            Ok(outcome) => {
                info!(target: "state::session", session_id = %self.session_id, "Pairing session completed");
                Ok(outcome)
            }
            Err(err) => {
                warn!(
                    target: "state::session",
                    session_id = %self.session_id,
                    state = %self.machine.state(),
                    error = %err,
                    "Pairing session failed"
                );
                self.abort(&err).await;
                Err(err)
            }
        }
    }

    // ========================================================================
    // Цикл событий
    // ========================================================================

    async fn drive(&mut self) -> Result<SessionOutcome> {
        let timeout_ms = Config::global().inactivity_timeout_ms;

        loop {
            self.cancel.check()?;

            // Watchdog создаётся заново на каждой итерации: активность сбрасывает срок
            match self.wait(timeout_ms).await {
                Wake::Cancelled => return Err(PairingError::Cancelled),
                Wake::Timeout => return Err(PairingError::Timeout(timeout_ms)),
                Wake::Event(None) => {
                    return Err(PairingError::ConnectionClosed {
                        code: CloseCode::Abnormal.as_u16(),
                    })
                }
                Wake::Event(Some(event)) => {
                    if let Some(outcome) = self.on_event(event).await? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    async fn wait(&mut self, timeout_ms: u64) -> Wake {
        let timer = self.deps.timer.clone();
        let cancel = self.cancel.clone();

        let event = self.transport.next_event();
        let watchdog = select(timer.sleep(timeout_ms), cancel.cancelled());

        let woke = select(event, watchdog).await;
        match woke {
            Either::Left((event, _)) => Wake::Event(event),
            Either::Right((Either::Left(_), _)) => Wake::Timeout,
            Either::Right((Either::Right(_), _)) => Wake::Cancelled,
        }
    }

    async fn on_event(&mut self, event: TransportEvent) -> Result<Option<SessionOutcome>> {
        use tracing::{debug, warn};

        match event {
            TransportEvent::Open => {
                let from = self.machine.state();
                let to = self.machine.on_socket_open()?;
                self.transition(from, to);
                Ok(None)
            }
            TransportEvent::Message(text) => self.on_message(&text).await,
            TransportEvent::Closed { code, reason } => {
                debug!(target: "state::session", code, reason = %reason, "Socket closed by relay");
                if code == CloseCode::Normal.as_u16() && !self.success {
                    return self.close_grace().await.map(Some);
                }
                Err(PairingError::ConnectionClosed { code })
            }
            TransportEvent::Error(message) => {
                // За ошибкой сокета всегда следует закрытие
                warn!(target: "state::session", error = %message, "Socket error");
                Ok(None)
            }
        }
    }

    /// Закрытие 1000 до записи об успехе: даём опоздавшим фреймам шанс
    async fn close_grace(&mut self) -> Result<SessionOutcome> {
        use tracing::debug;

        let config = Config::global();
        let timer = self.deps.timer.clone();
        let mut drained = false;

        for attempt in 0..config.close_grace_attempts {
            self.cancel.check()?;
            debug!(target: "state::session", attempt, "Waiting for success record");

            if drained {
                timer.sleep(config.close_grace_interval_ms).await;
                continue;
            }

            // Результат select держит заём сокета, поэтому разбираем его внутри блока
            let polled = {
                let event = self.transport.next_event();
                match select(event, timer.sleep(config.close_grace_interval_ms)).await {
                    Either::Left((event, rest)) => Some((event, rest)),
                    Either::Right(_) => None,
                }
            };

            match polled {
                Some((Some(TransportEvent::Message(text)), _)) => {
                    if let Some(outcome) = self.on_message(&text).await? {
                        return Ok(outcome);
                    }
                }
                Some((_, rest)) => {
                    drained = true;
                    rest.await;
                }
                None => {}
            }
        }

        Err(PairingError::ConnectionClosed {
            code: CloseCode::Normal.as_u16(),
        })
    }

    async fn on_message(&mut self, text: &str) -> Result<Option<SessionOutcome>> {
        use tracing::debug;

        let frame = wire::decode_frame(text)?;
        if frame.action.is_outbound_only() {
            return Err(PairingError::unexpected(frame.action, self.machine.state()));
        }

        let from = self.machine.state();
        let to = self.machine.on_inbound(frame.action)?;
        self.transition(from, to);

        debug!(
            target: "state::session",
            action = %frame.action,
            frame_id = %frame.id,
            "Frame received"
        );

        match frame.action {
            Action::Hello => self.on_hello(&frame).await?,
            Action::Challenge => self.on_challenge(&frame).await?,
            Action::PullRequestAction => self.on_pull_request_action(&frame).await?,
            Action::InitTransfer => self.on_init_transfer(&frame).await?,
            Action::TransferChunk => self.on_transfer_chunk(&frame).await?,
            Action::CloseWithSuccess => return self.on_close_success().await.map(Some),
            Action::CloseWithError => {
                let payload: ErrorPayload = frame.payload_as().unwrap_or(ErrorPayload {
                    code: CloseCode::InternalError.as_u16(),
                    message: String::new(),
                });
                return Err(PairingError::PeerClosedWithError {
                    code: payload.code,
                    message: payload.message,
                });
            }
            action => return Err(PairingError::unexpected(action, self.machine.state())),
        }
        Ok(None)
    }

    // ========================================================================
    // Рукопожатие
    // ========================================================================

    async fn on_hello(&mut self, frame: &Frame) -> Result<()> {
        let hello: HelloPayload = frame.payload_as()?;
        let peer_key = validation::validate_hello(&hello)?;

        let config = Config::global();
        let scheme = frame.scheme.unwrap_or(config.scheme);
        if scheme > config.scheme {
            return Err(PairingError::SchemeMismatch {
                peer: scheme,
                supported: config.scheme,
            });
        }

        let ephemeral =
            PairingKeys::load_ephemeral(self.deps.session_store.as_ref(), &self.ephemeral_uuid).await?;
        let shared = PairingKeys::derive_shared_secret(ephemeral.private_key(), &peer_key)?;

        let salt = ActiveSuite::random_bytes(config.hkdf_salt_length);
        let hkdf = PairingKeys::derive_session_key(&salt, &shared)?;
        let data = PairingKeys::derive_tier_key(&hkdf, KeyLabel::Data)?;
        self.pending_keys = Some(SessionKeys { hkdf, data });

        let salt_hex = hex::encode(&salt);
        self.salt_hex = Some(salt_hex.clone());

        let device = self
            .devices
            .record_hello(&self.ephemeral_uuid, &hello, &self.session_id, scheme)
            .await?;
        self.deps.events.emit(SessionEvent::DeviceConnected {
            device: device.clone(),
        });
        self.device = Some(device);

        self.send_frame(Action::Challenge, &ChallengeRequest { hkdf_salt: salt_hex })
            .await
            .map(|_| ())
    }

    async fn on_challenge(&mut self, frame: &Frame) -> Result<()> {
        use tracing::info;

        let envelope: EncryptedPayload = frame.payload_as()?;
        let keys = self
            .pending_keys
            .take()
            .ok_or_else(|| PairingError::unexpected(frame.action, self.machine.state()))?;
        let salt_hex = self.salt_hex.take().unwrap_or_default();

        self.cancel.check()?;
        let proof = PairingCipher::open_b64(
            &keys.data,
            &envelope.data,
            Some(Action::Challenge.as_str().as_bytes()),
        )
        .map_err(|e| PairingError::DecryptionFailure(format!("Challenge: {}", e)))?;

        let expected = format!("{}{}", self.session_id, salt_hex);
        if proof != expected.as_bytes() {
            return Err(PairingError::DecryptionFailure(
                "Challenge proof does not match the session".to_string(),
            ));
        }

        // Рукопожатие завершено: эфемерный ключ больше не нужен
        PairingKeys::clear_ephemeral(self.deps.session_store.as_ref(), &self.ephemeral_uuid).await?;
        self.keys = Some(keys);

        info!(target: "state::session", session_id = %self.session_id, "Challenge accepted");

        let request = PullRequestPayload {
            action: self.request.kind,
            data: self.request.data.clone(),
        };
        self.send_encrypted(Action::PullRequest, &request).await?;

        let from = self.machine.state();
        let to = self.machine.on_request_sent()?;
        self.transition(from, to);
        Ok(())
    }

    // ========================================================================
    // Запрос и передача
    // ========================================================================

    async fn on_pull_request_action(&mut self, frame: &Frame) -> Result<()> {
        let action: PullRequestAction = self.open(frame)?;
        action.validate()?;
        self.request.check_response(&action)?;
        self.action_frame_id = Some(frame.id.clone());

        if action.expects_transfer() {
            self.machine.expect_transfer(true);
            return Ok(());
        }

        let outcome = {
            let ctx = self.route_context()?;
            self.router.route(&action, &ctx).await?
        };
        self.outcome = Some(outcome);
        self.send_completed().await
    }

    async fn on_init_transfer(&mut self, frame: &Frame) -> Result<()> {
        use tracing::info;

        let init: InitTransferPayload = self.open(frame)?;
        validation::validate_init_transfer(&init)?;
        let assembler = ChunkAssembler::from_init(&init)?;

        info!(
            target: "state::session",
            transfer_id = %init.transfer_id,
            total_chunks = init.total_chunks,
            total_size = init.total_size,
            "Transfer announced"
        );

        let confirmed = InitTransferConfirmedPayload {
            transfer_id: init.transfer_id.clone(),
        };
        self.transfer = Some(ActiveTransfer { init, assembler });
        self.send_encrypted(Action::InitTransferConfirmed, &confirmed)
            .await
            .map(|_| ())
    }

    async fn on_transfer_chunk(&mut self, frame: &Frame) -> Result<()> {
        let chunk: TransferChunkPayload = self.open(frame)?;

        let transfer = self
            .transfer
            .as_mut()
            .ok_or_else(|| PairingError::unexpected(frame.action, self.machine.state()))?;
        validation::validate_chunk(&chunk, &transfer.init)?;
        transfer.assembler.put_payload(&chunk)?;

        let progress = transfer.assembler.progress();
        let complete = transfer.assembler.is_complete();
        self.deps.events.emit(SessionEvent::TransferProgress {
            transfer_id: chunk.transfer_id.clone(),
            progress,
        });

        if !complete {
            return Ok(());
        }

        let transfer = self
            .transfer
            .take()
            .ok_or_else(|| PairingError::unexpected(frame.action, self.machine.state()))?;
        let payload = transfer.assembler.finalize()?;

        let from = self.machine.state();
        let to = self.machine.on_transfer_complete()?;
        self.transition(from, to);

        let outcome = {
            let ctx = self.route_context()?;
            self.router.route_full_sync(&payload, &ctx).await?
        };
        self.outcome = Some(outcome);
        self.send_completed().await
    }

    async fn on_close_success(&mut self) -> Result<SessionOutcome> {
        use tracing::warn;

        self.success = true;
        if let Err(e) = self
            .transport
            .close(CloseCode::Normal, CloseCode::Normal.reason())
            .await
        {
            warn!(target: "state::session", error = %e, "Failed to close socket");
        }
        self.clear_keys();

        self.deps.events.emit(SessionEvent::Completed {
            session_id: self.session_id.clone(),
        });

        Ok(SessionOutcome {
            session_id: self.session_id.clone(),
            device: self.device.clone(),
            result: self.outcome.take(),
        })
    }

    async fn send_completed(&mut self) -> Result<()> {
        let completed = PullRequestCompletedPayload {
            message_id: self.action_frame_id.clone().unwrap_or_default(),
        };
        self.send_encrypted(Action::PullRequestCompleted, &completed)
            .await
            .map(|_| ())
    }

    fn route_context(&self) -> Result<RouteContext<'_>> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| PairingError::KeyDerivationFailure("Session key is not attached".to_string()))?;
        Ok(RouteContext {
            hkdf_key: &keys.hkdf,
            cancel: &self.cancel,
            now: self.deps.timer.now_millis(),
        })
    }

    // ========================================================================
    // Шифрование и отправка
    // ========================================================================

    /// Расшифровать конверт фрейма. AAD = имя действия.
    fn open<T: DeserializeOwned>(&self, frame: &Frame) -> Result<T> {
        self.cancel.check()?;
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| PairingError::unexpected(frame.action, self.machine.state()))?;

        let envelope: EncryptedPayload = frame.payload_as()?;
        let plaintext = PairingCipher::open_b64(
            &keys.data,
            &envelope.data,
            Some(frame.action.as_str().as_bytes()),
        )
        .map_err(|e| PairingError::DecryptionFailure(format!("{}: {}", frame.action, e)))?;

        self.cancel.check()?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            PairingError::Validation(format!("Invalid {} payload: {}", frame.action, e))
        })
    }

    async fn send_encrypted<T: Serialize>(&mut self, action: Action, payload: &T) -> Result<String> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| PairingError::KeyDerivationFailure("Session key is not attached".to_string()))?;

        let plaintext = serde_json::to_vec(payload)?;
        let data = PairingCipher::seal_b64(&keys.data, &plaintext, Some(action.as_str().as_bytes()))?;
        self.send_frame(action, &EncryptedPayload { data }).await
    }

    async fn send_frame<T: Serialize>(&mut self, action: Action, payload: &T) -> Result<String> {
        self.cancel.check()?;
        let id = self.push_frame(action, payload).await?;
        self.cancel.check()?;
        Ok(id)
    }

    /// Отправка без проверки отмены (нужна при аварийном закрытии)
    async fn push_frame<T: Serialize>(&mut self, action: Action, payload: &T) -> Result<String> {
        use tracing::debug;

        let frame = wire::outbound(action, payload)?;
        let text = wire::encode_frame(&frame)?;
        self.transport.send(text).await?;

        debug!(target: "state::session", action = %action, frame_id = %frame.id, "Frame sent");
        Ok(frame.id)
    }

    // ========================================================================
    // Завершение
    // ========================================================================

    fn transition(&mut self, from: SocketState, to: SocketState) {
        use tracing::debug;

        if from == to {
            return;
        }
        debug!(target: "state::session", from = %from, to = %to, "State changed");
        self.deps.events.emit(SessionEvent::StateChanged {
            session_id: self.session_id.clone(),
            from,
            to,
        });
    }

    fn clear_keys(&mut self) {
        self.pending_keys = None;
        self.keys = None;
        self.salt_hex = None;
        self.transfer = None;
    }

    async fn abort(&mut self, err: &PairingError) {
        use tracing::warn;

        let close_code = err.close_code();
        let socket_open = self.machine.state() != SocketState::Idle;

        if socket_open && !err.reported_by_peer() {
            let payload = ErrorPayload {
                code: close_code.as_u16(),
                message: err.to_string(),
            };
            if let Err(e) = self.push_frame(Action::CloseWithError, &payload).await {
                warn!(target: "state::session", error = %e, "Failed to report error to peer");
            }
        }

        if let Err(e) = self.transport.close(close_code, close_code.reason()).await {
            warn!(target: "state::session", error = %e, "Failed to close socket");
        }
        self.clear_keys();

        // Результат до вызывающего не дойдёт, выданный ключ перешифровки не нужен
        if let Some(RouteOutcome::Fetched(fetch)) = self.outcome.take() {
            if let FetchedSecret::Wrapped { key_ref, .. } = &fetch.secret {
                if let Err(e) = self.deps.session_store.remove(key_ref).await {
                    warn!(target: "state::session", error = %e, "Failed to remove transport key");
                }
            }
        }

        if let Err(e) =
            PairingKeys::clear_ephemeral(self.deps.session_store.as_ref(), &self.ephemeral_uuid).await
        {
            warn!(target: "state::session", error = %e, "Failed to clear ephemeral key");
        }

        let from = self.machine.state();
        let to = self.machine.fail();
        self.transition(from, to);

        self.deps.events.emit(SessionEvent::Failed {
            session_id: self.session_id.clone(),
            close_code: close_code.as_u16(),
            message: err.user_message(),
        });
    }
}
