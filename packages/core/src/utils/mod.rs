// Утилиты

pub mod b64;
pub mod error;
pub mod logging;
pub mod time;
pub mod uuid;

/// Коллабораторы, которые уходят в фоновые задачи: Send + Sync на native.
/// В браузере всё однопоточное, ограничения нет.
#[cfg(not(target_arch = "wasm32"))]
pub trait Shared: Send + Sync {}

#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync + ?Sized> Shared for T {}

#[cfg(target_arch = "wasm32")]
pub trait Shared {}

#[cfg(target_arch = "wasm32")]
impl<T: ?Sized> Shared for T {}
