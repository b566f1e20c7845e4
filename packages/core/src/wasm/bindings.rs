// WASM bindings
// Клиенты живут в thread_local реестре, JS обращается к ним по id

use crate::api::devices::{PushChannel, WakeRequest};
use crate::api::router::{FetchedSecret, RouteOutcome};
use crate::api::{PassConnect, PreparedSession};
use crate::protocol::messages::PullRequestPayload;
use crate::protocol::qr::QrPayload;
use crate::state::events::{EventSink, SessionEvent};
use crate::state::session::{RequestContext, SessionOutcome};
use crate::storage::models::Device;
use crate::utils::b64;
use crate::utils::error::{PairingError, Result};
use crate::wasm::timer::WasmTimer;
use crate::wasm::web_storage::{WebSessionStore, WebVaultStore};
use crate::wasm::websocket::WebSocketTransport;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

type JsResult<T> = std::result::Result<T, JsValue>;

struct ClientState {
    api: PassConnect,
    prepared: RefCell<Option<PreparedSession>>,
}

thread_local! {
    static CLIENTS: RefCell<HashMap<String, Rc<ClientState>>> = RefCell::new(HashMap::new());
}

fn get_client(client_id: &str) -> JsResult<Rc<ClientState>> {
    CLIENTS
        .with(|clients| clients.borrow().get(client_id).cloned())
        .ok_or_else(|| JsValue::from_str("Pairing client not found"))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| PairingError::Serialization(e.to_string()))
}

/// Push-канал, делегирующий в JS-функцию `(device, wakeRequest) => Promise?`
struct JsPushChannel {
    handler: js_sys::Function,
}

#[async_trait(?Send)]
impl PushChannel for JsPushChannel {
    async fn wake(&self, device: &Device, request: &WakeRequest) -> Result<()> {
        let result = self
            .handler
            .call2(&JsValue::NULL, &to_js(device)?, &to_js(request)?)
            .map_err(|e| PairingError::Transport(format!("Push handler failed: {:?}", e)))?;

        if let Ok(promise) = result.dyn_into::<js_sys::Promise>() {
            JsFuture::from(promise)
                .await
                .map_err(|e| PairingError::Transport(format!("Push handler rejected: {:?}", e)))?;
        }
        Ok(())
    }
}

// ============================================================================
// Жизненный цикл клиента
// ============================================================================

#[wasm_bindgen]
pub fn init() {
    crate::utils::logging::init();
}

/// Создать клиента. `on_event` получает события сессии, `push_handler` будит устройства.
#[wasm_bindgen]
pub fn create_pairing_client(
    on_event: Option<js_sys::Function>,
    push_handler: Option<js_sys::Function>,
) -> JsResult<String> {
    let mut api = PassConnect::new(
        Arc::new(WebSessionStore::new()?),
        Arc::new(WebVaultStore::new()?),
        Arc::new(WasmTimer),
    );

    if let Some(callback) = on_event {
        let (sink, mut events) = EventSink::channel();
        wasm_bindgen_futures::spawn_local(async move {
            while let Some(event) = events.next().await {
                if let Ok(value) = to_js(&event_json(&event)) {
                    let _ = callback.call1(&JsValue::NULL, &value);
                }
            }
        });
        api = api.with_events(sink);
    }

    if let Some(handler) = push_handler {
        api = api.with_push(Arc::new(JsPushChannel { handler }));
    }

    let client_id = crate::utils::uuid::generate_v4();
    let state = Rc::new(ClientState {
        api,
        prepared: RefCell::new(None),
    });
    CLIENTS.with(|clients| {
        clients.borrow_mut().insert(client_id.clone(), state);
    });
    Ok(client_id)
}

#[wasm_bindgen]
pub fn destroy_pairing_client(client_id: String) {
    CLIENTS.with(|clients| {
        if let Some(client) = clients.borrow_mut().remove(&client_id) {
            client.api.close_live();
        }
    });
}

// ============================================================================
// Сессии
// ============================================================================

fn prepared_json(prepared: &PreparedSession) -> serde_json::Value {
    json!({
        "sessionId": prepared.session_id(),
        "qr": prepared.qr_string(),
        "relayUrl": prepared.relay_url(),
    })
}

/// Открыть QR-сессию. Возвращает `{sessionId, qr, relayUrl}`.
#[wasm_bindgen]
pub async fn pairing_open_qr(client_id: String) -> JsResult<JsValue> {
    let client = get_client(&client_id)?;
    // Старая подготовленная сессия освобождает слот до новой попытки
    client.prepared.borrow_mut().take();

    let prepared = client.api.open_qr_session().await?;
    let value = to_js(&prepared_json(&prepared))?;
    *client.prepared.borrow_mut() = Some(prepared);
    Ok(value)
}

/// Разбудить запомненное устройство push-запросом
#[wasm_bindgen]
pub async fn pairing_reconnect(client_id: String, device_id: String) -> JsResult<JsValue> {
    let client = get_client(&client_id)?;
    client.prepared.borrow_mut().take();

    let prepared = client.api.reconnect_device(&device_id).await?;
    let value = to_js(&prepared_json(&prepared))?;
    *client.prepared.borrow_mut() = Some(prepared);
    Ok(value)
}

/// Подключиться к relay и провести подготовленную сессию.
/// `request`: `{action: "sifRequest" | ..., data: {...}}`
#[wasm_bindgen]
pub async fn pairing_run(client_id: String, request: JsValue) -> JsResult<JsValue> {
    let client = get_client(&client_id)?;
    let request: PullRequestPayload = serde_wasm_bindgen::from_value(request)?;

    let prepared = client
        .prepared
        .borrow_mut()
        .take()
        .ok_or_else(|| JsValue::from_str("No prepared session"))?;

    let transport = WebSocketTransport::connect(&prepared.relay_url())?;
    let session = client.api.attach(
        prepared,
        Box::new(transport),
        RequestContext::new(request.action, request.data),
    );

    let outcome = session.run().await?;
    Ok(to_js(&outcome_json(&outcome))?)
}

/// Закрыть живую сессию
#[wasm_bindgen]
pub fn pairing_cancel(client_id: String) -> JsResult<bool> {
    let client = get_client(&client_id)?;
    let had_prepared = client.prepared.borrow_mut().take().is_some();
    Ok(client.api.close_live() || had_prepared)
}

#[wasm_bindgen]
pub async fn pairing_purge_expired(client_id: String) -> JsResult<JsValue> {
    let client = get_client(&client_id)?;
    let purged = client.api.purge_expired().await?;
    Ok(to_js(&purged)?)
}

/// Забрать ключ перешифровки (base64) по `keyRef` из результата fetched
#[wasm_bindgen]
pub async fn pairing_consume_transport_key(client_id: String, key_ref: String) -> JsResult<String> {
    let client = get_client(&client_id)?;
    let key = client.api.consume_transport_key(&key_ref).await?;
    Ok(b64::encode(key.as_bytes()))
}

#[wasm_bindgen]
pub async fn pairing_devices(client_id: String) -> JsResult<JsValue> {
    let client = get_client(&client_id)?;
    let devices = client.api.devices().await?;
    Ok(to_js(&devices)?)
}

#[wasm_bindgen]
pub async fn pairing_forget_device(client_id: String, device_id: String) -> JsResult<()> {
    let client = get_client(&client_id)?;
    client.api.forget_device(&device_id).await?;
    Ok(())
}

/// Разобрать и проверить QR-строку
#[wasm_bindgen]
pub fn parse_qr(qr: String) -> JsResult<JsValue> {
    let payload = QrPayload::parse(&qr)?;
    payload.verify()?;
    Ok(to_js(&json!({
        "scheme": payload.scheme,
        "sessionId": payload.session_id,
        "persistentPublicKey": hex::encode(&payload.persistent_public_key),
        "ephemeralPublicKey": hex::encode(&payload.ephemeral_public_key),
    }))?)
}

// ============================================================================
// JSON представления
// ============================================================================

fn event_json(event: &SessionEvent) -> serde_json::Value {
    match event {
        SessionEvent::QrReady { session_id, payload } => json!({
            "type": "qrReady",
            "sessionId": session_id,
            "qr": payload,
        }),
        SessionEvent::StateChanged { session_id, from, to } => json!({
            "type": "stateChanged",
            "sessionId": session_id,
            "from": from.to_string(),
            "to": to.to_string(),
        }),
        SessionEvent::DeviceConnected { device } => json!({
            "type": "deviceConnected",
            "device": device,
        }),
        SessionEvent::TransferProgress { transfer_id, progress } => json!({
            "type": "transferProgress",
            "transferId": transfer_id,
            "progress": progress,
        }),
        SessionEvent::Completed { session_id } => json!({
            "type": "completed",
            "sessionId": session_id,
        }),
        SessionEvent::Failed {
            session_id,
            close_code,
            message,
        } => json!({
            "type": "failed",
            "sessionId": session_id,
            "closeCode": close_code,
            "message": message.text(),
        }),
    }
}

fn outcome_json(outcome: &SessionOutcome) -> serde_json::Value {
    let result = outcome.result.as_ref().map(|result| match result {
        RouteOutcome::Declined { kind } => json!({ "type": "declined", "action": kind }),
        RouteOutcome::Fetched(fetch) => {
            let secret = match &fetch.secret {
                FetchedSecret::Wrapped { key_ref, envelope } => json!({
                    "keyRef": key_ref,
                    "envelope": b64::encode(envelope),
                }),
                FetchedSecret::Plain(bytes) => json!({ "plain": b64::encode(bytes.as_bytes()) }),
            };
            json!({
                "type": "fetched",
                "itemId": fetch.item_id,
                "tier": fetch.tier,
                "secret": secret,
                "expiresAt": fetch.expires_at,
            })
        }
        RouteOutcome::Saved { item_ids } => json!({ "type": "saved", "itemIds": item_ids }),
        RouteOutcome::MetadataOnly { item_id } => json!({ "type": "metadataOnly", "itemId": item_id }),
        RouteOutcome::AddedElsewhere { item_id } => json!({ "type": "addedElsewhere", "itemId": item_id }),
        RouteOutcome::Deleted { item_id } => json!({ "type": "deleted", "itemId": item_id }),
        RouteOutcome::Synced { added, updated } => json!({
            "type": "synced",
            "added": added,
            "updated": updated,
        }),
    });

    json!({
        "sessionId": outcome.session_id,
        "device": outcome.device,
        "result": result,
    })
}
