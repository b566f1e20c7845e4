// Таймер поверх setTimeout

use crate::protocol::transport::{Timer, TimerTask};
use async_trait::async_trait;
use wasm_bindgen_futures::JsFuture;

#[derive(Debug, Clone, Copy, Default)]
pub struct WasmTimer;

#[async_trait(?Send)]
impl Timer for WasmTimer {
    async fn sleep(&self, millis: u64) {
        let delay = millis.min(i32::MAX as u64) as i32;
        let promise = js_sys::Promise::new(&mut |resolve, _reject| {
            if let Some(window) = web_sys::window() {
                let _ = window.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, delay);
            }
        });
        let _ = JsFuture::from(promise).await;
    }

    fn now_millis(&self) -> i64 {
        js_sys::Date::now() as i64
    }

    fn spawn(&self, task: TimerTask) -> bool {
        wasm_bindgen_futures::spawn_local(task);
        true
    }
}
