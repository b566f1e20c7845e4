// События сессии для внешнего подписчика (UI)

use crate::state::machine::SocketState;
use crate::storage::models::Device;
use crate::utils::error::UserMessage;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// QR готов к показу
    QrReady { session_id: String, payload: String },
    StateChanged {
        session_id: String,
        from: SocketState,
        to: SocketState,
    },
    DeviceConnected { device: Device },
    TransferProgress { transfer_id: String, progress: u8 },
    Completed { session_id: String },
    Failed {
        session_id: String,
        close_code: u16,
        message: UserMessage,
    },
}

/// Отправитель событий. Отсутствие подписчика не ошибка.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<SessionEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            // Подписчик мог отключиться
            let _ = tx.unbounded_send(event);
        }
    }
}
