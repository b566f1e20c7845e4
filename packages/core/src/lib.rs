// PassLink Core
// Rust/WASM движок сопряжения браузера с телефоном и синхронизации секретов

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

// Модули
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod state;
pub mod storage;
pub mod utils;

// Re-exports для удобства
pub use api::{PassConnect, PreparedSession};
pub use state::session::{PairingSession, RequestContext, SessionOutcome};
pub use utils::error::{PairingError, Result};

// WASM-specific bindings
#[cfg(target_arch = "wasm32")]
pub mod wasm;
