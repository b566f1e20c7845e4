//! Централизованная конфигурация для PassLink Core
//!
//! Все константы протокола сопряжения и таймауты определены здесь,
//! чтобы избежать хардкода по всему проекту.

use std::sync::OnceLock;

/// Глобальная конфигурация приложения (синглтон)
static GLOBAL_CONFIG: OnceLock<Config> = OnceLock::new();

/// Основная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    // ============================================
    // ПРОТОКОЛ
    // ============================================

    /// Версия протокола (scheme), которую отправляет клиент
    pub scheme: u32,

    /// Идентификатор отправителя во всех исходящих фреймах
    pub origin: String,

    /// Версия реализации отправителя
    pub origin_version: String,

    /// Базовый URL relay-сервера
    pub relay_url: String,

    // ============================================
    // КРИПТОГРАФИЧЕСКИЕ ПАРАМЕТРЫ
    // ============================================

    /// Длина sessionID в байтах (до hex-кодирования)
    pub session_id_length: usize,

    /// Длина соли HKDF, которую клиент отправляет в CHALLENGE
    pub hkdf_salt_length: usize,

    /// Длина ключа AES-256 (в байтах)
    pub aes_key_length: usize,

    /// Длина nonce для AES-GCM (в байтах)
    pub nonce_length: usize,

    /// Длина контрольной суммы передачи (SHA-256)
    pub checksum_length: usize,

    /// Длина сжатого SEC1 публичного ключа P-256
    pub compressed_public_key_length: usize,

    // ============================================
    // ТАЙМАУТЫ И ПОВТОРЫ
    // ============================================

    /// Watchdog бездействия: сбрасывается на каждом переходе состояния
    pub inactivity_timeout_ms: u64,

    /// Количество попыток открыть QR-сессию при InstanceExists
    pub instance_retry_attempts: u32,

    /// Фиксированная пауза между попытками
    pub instance_retry_backoff_ms: u64,

    /// Сколько раз проверять запись об успехе после закрытия с кодом 1000
    pub close_grace_attempts: u32,

    /// Интервал между такими проверками
    pub close_grace_interval_ms: u64,

    /// Через сколько минут кэш T2 секрета очищается
    pub t2_expiry_minutes: u64,

    // ============================================
    // ЛИМИТЫ
    // ============================================

    /// Максимальное количество чанков в одной передаче
    pub max_chunks: u32,

    /// Максимальный размер входящего фрейма
    pub max_frame_bytes: usize,

    /// Предел размера передачи: и сжатого потока, и распакованных данных
    pub max_transfer_bytes: usize,

    /// Перешифровывать ли полученный секрет локальным транспортным ключом
    pub rewrap_fetched_secrets: bool,
}

impl Config {
    /// Создать конфигурацию с дефолтными значениями
    pub fn default() -> Self {
        Self {
            // Протокол
            scheme: 1,
            origin: "browserExt".to_string(),
            origin_version: env!("CARGO_PKG_VERSION").to_string(),
            relay_url: "wss://relay.passlink.app/proxy/browser_extension".to_string(),

            // Криптография
            session_id_length: 16,
            hkdf_salt_length: 32,
            aes_key_length: 32,
            nonce_length: 12,
            checksum_length: 32,
            compressed_public_key_length: 33,

            // Таймауты
            inactivity_timeout_ms: 60_000,
            instance_retry_attempts: 5,
            instance_retry_backoff_ms: 250,
            close_grace_attempts: 10,
            close_grace_interval_ms: 100,
            t2_expiry_minutes: 3,

            // Лимиты
            max_chunks: 10_000,
            max_frame_bytes: 4 * 1024 * 1024,
            max_transfer_bytes: 32 * 1024 * 1024,
            rewrap_fetched_secrets: true,
        }
    }

    /// Создать конфигурацию из переменных окружения
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Переопределяем значения из env, если они заданы
        if let Ok(val) = std::env::var("PASSLINK_RELAY_URL") {
            if !val.is_empty() {
                config.relay_url = val;
            }
        }

        if let Ok(val) = std::env::var("PASSLINK_INACTIVITY_TIMEOUT_MS") {
            if let Ok(parsed) = val.parse() {
                config.inactivity_timeout_ms = parsed;
            }
        }

        if let Ok(val) = std::env::var("PASSLINK_T2_EXPIRY_MINUTES") {
            if let Ok(parsed) = val.parse() {
                config.t2_expiry_minutes = parsed;
            }
        }

        if let Ok(val) = std::env::var("PASSLINK_MAX_TRANSFER_BYTES") {
            if let Ok(parsed) = val.parse() {
                config.max_transfer_bytes = parsed;
            }
        }

        if let Ok(val) = std::env::var("PASSLINK_RETRY_ATTEMPTS") {
            if let Ok(parsed) = val.parse() {
                config.instance_retry_attempts = parsed;
            }
        }

        config
    }

    /// Получить глобальный экземпляр конфигурации
    ///
    /// Автоматически инициализирует конфигурацию со значениями по умолчанию при первом вызове
    pub fn global() -> &'static Config {
        GLOBAL_CONFIG.get_or_init(Config::default)
    }

    /// Инициализировать глобальную конфигурацию со значениями по умолчанию
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::default())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию из переменных окружения
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_from_env() -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(Self::from_env())
            .map_err(|_| "Config already initialized")
    }

    /// Инициализировать глобальную конфигурацию с кастомным экземпляром
    ///
    /// # Errors
    ///
    /// Возвращает ошибку, если конфигурация уже была инициализирована
    pub fn init_with(config: Config) -> Result<(), &'static str> {
        GLOBAL_CONFIG
            .set(config)
            .map_err(|_| "Config already initialized")
    }

    /// Проверить, инициализирована ли глобальная конфигурация
    pub fn is_initialized() -> bool {
        GLOBAL_CONFIG.get().is_some()
    }

    /// Срок жизни кэша T2 в миллисекундах
    pub fn t2_expiry_ms(&self) -> i64 {
        (self.t2_expiry_minutes * 60 * 1000) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheme, 1);
        assert_eq!(config.session_id_length, 16);
        assert_eq!(config.instance_retry_attempts, 5);
    }

    #[test]
    fn test_config_values() {
        let config = Config::default();

        // Crypto params
        assert_eq!(config.hkdf_salt_length, 32);
        assert_eq!(config.aes_key_length, 32);
        assert_eq!(config.nonce_length, 12);
        assert_eq!(config.compressed_public_key_length, 33);

        // Close grace: 10 проверок по 100ms = 1 секунда
        assert_eq!(config.close_grace_attempts, 10);
        assert_eq!(config.close_grace_interval_ms, 100);

        assert_eq!(config.t2_expiry_ms(), 3 * 60 * 1000);
    }
}
