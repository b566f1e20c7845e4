// Время

/// Текущее время в миллисекундах (Unix epoch)
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
