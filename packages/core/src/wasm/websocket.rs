// WebSocket транспорт
// Обёртка над браузерным WebSocket: события сокета складываются в канал,
// драйвер сессии читает их через Transport::next_event

use crate::protocol::transport::{CloseCode, Transport, TransportEvent};
use crate::utils::error::{PairingError, Result};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver};
use futures::StreamExt;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

pub struct WebSocketTransport {
    ws: WebSocket,
    events: UnboundedReceiver<TransportEvent>,
    // Колбэки живут столько же, сколько транспорт
    _on_open: Closure<dyn FnMut(JsValue)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(ErrorEvent)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl WebSocketTransport {
    /// Подключиться к relay
    pub fn connect(url: &str) -> Result<Self> {
        use tracing::debug;

        let ws = WebSocket::new(url).map_err(|e| {
            PairingError::Transport(format!("Failed to create WebSocket: {:?}", e))
        })?;
        let (tx, events) = unbounded();

        let open_tx = tx.clone();
        let on_open = Closure::wrap(Box::new(move |_event: JsValue| {
            let _ = open_tx.unbounded_send(TransportEvent::Open);
        }) as Box<dyn FnMut(JsValue)>);
        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let message_tx = tx.clone();
        let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
            // Relay пересылает только текстовые фреймы
            if let Some(text) = event.data().as_string() {
                let _ = message_tx.unbounded_send(TransportEvent::Message(text));
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        let error_tx = tx.clone();
        let on_error = Closure::wrap(Box::new(move |_event: ErrorEvent| {
            let _ = error_tx.unbounded_send(TransportEvent::Error("WebSocket error occurred".to_string()));
        }) as Box<dyn FnMut(ErrorEvent)>);
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        let on_close = Closure::wrap(Box::new(move |event: CloseEvent| {
            let _ = tx.unbounded_send(TransportEvent::Closed {
                code: event.code(),
                reason: event.reason(),
            });
        }) as Box<dyn FnMut(CloseEvent)>);
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        debug!(target: "wasm::websocket", url = %url, "WebSocket created");

        Ok(Self {
            ws,
            events,
            _on_open: on_open,
            _on_message: on_message,
            _on_error: on_error,
            _on_close: on_close,
        })
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
    }
}

#[async_trait(?Send)]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.ws
            .send_with_str(&frame)
            .map_err(|e| PairingError::Transport(format!("Failed to send: {:?}", e)))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.next().await
    }

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()> {
        // Браузер разрешает закрывать только с 1000 или 3000..=4999
        let code = match code.as_u16() {
            c @ 3000..=4999 => c,
            _ => CloseCode::Normal.as_u16(),
        };
        self.ws
            .close_with_code_and_reason(code, reason)
            .map_err(|e| PairingError::Transport(format!("Failed to close: {:?}", e)))
    }
}
