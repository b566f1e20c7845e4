// Браузерные адаптеры: WebSocket, Web Storage, setTimeout и JS API

pub mod bindings;
pub mod timer;
pub mod web_storage;
pub mod websocket;

pub use timer::WasmTimer;
pub use web_storage::{WebSessionStore, WebVaultStore};
pub use websocket::WebSocketTransport;
