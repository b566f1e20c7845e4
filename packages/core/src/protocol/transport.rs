// Транспорт
// Двунаправленный message-oriented сокет, который предоставляет хост

use crate::utils::error::Result;
use crate::utils::Shared;
use async_trait::async_trait;

/// Коды закрытия сокета
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    Normal,
    GoingAway,
    /// Соединение оборвалось без close-фрейма
    Abnormal,
    ProtocolError,
    Timeout,
    PolicyViolation,
    PeerDisconnected,
    SchemeMismatch,
    InternalError,
    Cancelled,
}

impl CloseCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::Abnormal => 1006,
            CloseCode::ProtocolError => 4000,
            CloseCode::Timeout => 4001,
            CloseCode::PolicyViolation => 4002,
            CloseCode::PeerDisconnected => 4003,
            CloseCode::SchemeMismatch => 4004,
            CloseCode::InternalError => 4005,
            CloseCode::Cancelled => 4006,
        }
    }

    pub fn from_u16(code: u16) -> Option<CloseCode> {
        let code = match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1006 => CloseCode::Abnormal,
            4000 => CloseCode::ProtocolError,
            4001 => CloseCode::Timeout,
            4002 => CloseCode::PolicyViolation,
            4003 => CloseCode::PeerDisconnected,
            4004 => CloseCode::SchemeMismatch,
            4005 => CloseCode::InternalError,
            4006 => CloseCode::Cancelled,
            _ => return None,
        };
        Some(code)
    }

    /// Причина для close-фрейма
    pub fn reason(&self) -> &'static str {
        match self {
            CloseCode::Normal => "normal",
            CloseCode::GoingAway => "going away",
            CloseCode::Abnormal => "abnormal closure",
            CloseCode::ProtocolError => "protocol error",
            CloseCode::Timeout => "timeout",
            CloseCode::PolicyViolation => "policy violation",
            CloseCode::PeerDisconnected => "peer disconnected",
            CloseCode::SchemeMismatch => "scheme mismatch",
            CloseCode::InternalError => "internal error",
            CloseCode::Cancelled => "cancelled",
        }
    }
}

/// События сокета
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// Адаптер сокета, которым пользуется конечный автомат
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Transport {
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Следующее событие; `None` если поток событий закончился
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn close(&mut self, code: CloseCode, reason: &str) -> Result<()>;
}

/// Фоновая задача, которую запускает таймер
#[cfg(not(target_arch = "wasm32"))]
pub type TimerTask = futures::future::BoxFuture<'static, ()>;

#[cfg(target_arch = "wasm32")]
pub type TimerTask = futures::future::LocalBoxFuture<'static, ()>;

/// Источник времени для watchdog и пауз, исполнитель отложенных задач
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait Timer: Shared {
    async fn sleep(&self, millis: u64);

    fn now_millis(&self) -> i64 {
        crate::utils::time::now_millis()
    }

    /// Запустить задачу в фоне. `false`, если исполнителя нет.
    fn spawn(&self, _task: TimerTask) -> bool {
        false
    }
}

/// Таймер на tokio (native)
#[cfg(feature = "desktop")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[cfg(feature = "desktop")]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl Timer for TokioTimer {
    async fn sleep(&self, millis: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
    }

    /// Вне tokio runtime задачи не запускаются
    fn spawn(&self, task: TimerTask) -> bool {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_code_table() {
        for code in [1000, 1001, 1006, 4000, 4001, 4002, 4003, 4004, 4005, 4006] {
            let parsed = CloseCode::from_u16(code).unwrap();
            assert_eq!(parsed.as_u16(), code);
            assert!(!parsed.reason().is_empty());
        }
        assert_eq!(CloseCode::from_u16(3000), None);
    }
}
