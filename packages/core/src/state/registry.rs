//! Единственная живая сессия сопряжения
//!
//! `SocketRegistry::acquire` выдаёт `SocketLease`, пока он жив вторая сессия
//! получает `InstanceExists`. Освобождение происходит при drop аренды.

use crate::utils::error::{PairingError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// Кооперативная отмена: проверяется в точках приостановки.
/// `cancel()` будит всех, кто ждёт `cancelled()`.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let wakers = std::mem::take(&mut *self.inner.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
    }

    fn register(&self, waker: &Waker) {
        let mut wakers = self.inner.wakers.lock();
        // Ожидания пересоздаются на каждой итерации цикла сессии: не копим дубликаты
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)`, если отмена уже запрошена
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PairingError::Cancelled);
        }
        Ok(())
    }

    /// Future, завершающийся при отмене
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled { signal: self }
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

pub struct Cancelled<'a> {
    signal: &'a CancelSignal,
}

impl Future for Cancelled<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.signal.is_cancelled() {
            return Poll::Ready(());
        }
        self.signal.register(cx.waker());
        // Повторная проверка после регистрации, чтобы не потерять wake
        if self.signal.is_cancelled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

struct LiveEntry {
    session_id: String,
    cancel: CancelSignal,
}

/// Владелец слота живой сессии. Передаётся явно, не глобальный.
#[derive(Clone, Default)]
pub struct SocketRegistry {
    live: Arc<Mutex<Option<LiveEntry>>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Занять слот. Если слот занят, существующая сессия не трогается.
    pub fn acquire(&self, session_id: &str, cancel: CancelSignal) -> Result<SocketLease> {
        use tracing::debug;

        let mut live = self.live.lock();
        if let Some(entry) = live.as_ref() {
            debug!(
                target: "state::registry",
                live_session = %entry.session_id,
                rejected_session = %session_id,
                "Pairing session already live"
            );
            return Err(PairingError::InstanceExists);
        }

        *live = Some(LiveEntry {
            session_id: session_id.to_string(),
            cancel: cancel.clone(),
        });

        Ok(SocketLease {
            registry: self.clone(),
            session_id: session_id.to_string(),
            cancel,
        })
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }

    pub fn live_session_id(&self) -> Option<String> {
        self.live.lock().as_ref().map(|entry| entry.session_id.clone())
    }

    /// Попросить живую сессию закрыться. Слот освобождается её арендой.
    pub fn close_live(&self) -> bool {
        match self.live.lock().as_ref() {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn release(&self, session_id: &str) {
        let mut live = self.live.lock();
        if live.as_ref().map(|e| e.session_id.as_str()) == Some(session_id) {
            *live = None;
        }
    }
}

/// Аренда слота живой сессии
pub struct SocketLease {
    registry: SocketRegistry,
    session_id: String,
    cancel: CancelSignal,
}

impl SocketLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }
}

impl std::fmt::Debug for SocketLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketLease")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.registry.release(&self.session_id);
    }
}
