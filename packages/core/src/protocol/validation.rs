// Валидация входящих данных

use crate::config::Config;
use crate::protocol::messages::{HelloPayload, InitTransferPayload, TransferChunkPayload};
use crate::utils::error::{PairingError, Result};

/// Валидация hex строки ожидаемой длины (в байтах)
pub fn validate_hex(value: &str, expected_bytes: usize, what: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(value)
        .map_err(|_| PairingError::Validation(format!("{} is not valid hex", what)))?;
    if bytes.len() != expected_bytes {
        return Err(PairingError::Validation(format!(
            "{} must be {} bytes, got {}",
            what,
            expected_bytes,
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// sessionID: 16 случайных байт в hex
pub fn validate_session_id(session_id: &str) -> Result<()> {
    validate_hex(session_id, Config::global().session_id_length, "Session id")?;
    if session_id.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(PairingError::Validation(
            "Session id must be lowercase hex".to_string(),
        ));
    }
    Ok(())
}

/// Сжатая SEC1 точка: 33 байта, префикс 0x02 или 0x03
pub fn validate_compressed_key(value: &str) -> Result<Vec<u8>> {
    let bytes = validate_hex(
        value,
        Config::global().compressed_public_key_length,
        "Public key",
    )?;
    if bytes[0] != 0x02 && bytes[0] != 0x03 {
        return Err(PairingError::Validation(
            "Public key is not in compressed form".to_string(),
        ));
    }
    Ok(bytes)
}

/// Валидация HELLO: идентификаторы не пустые, ключ в сжатой форме
pub fn validate_hello(hello: &HelloPayload) -> Result<Vec<u8>> {
    if hello.device_id.trim().is_empty() {
        return Err(PairingError::Validation("Device id is empty".to_string()));
    }
    if hello.device_name.trim().is_empty() {
        return Err(PairingError::Validation("Device name is empty".to_string()));
    }
    validate_compressed_key(&hello.device_public_key)
}

/// Валидация INIT_TRANSFER
pub fn validate_init_transfer(init: &InitTransferPayload) -> Result<Vec<u8>> {
    let cfg = Config::global();

    if init.transfer_id.is_empty() {
        return Err(PairingError::Validation("Transfer id is empty".to_string()));
    }
    if init.total_chunks == 0 || init.total_chunks > cfg.max_chunks {
        return Err(PairingError::Validation(format!(
            "Total chunks must be between 1 and {}, got {}",
            cfg.max_chunks, init.total_chunks
        )));
    }
    if init.total_size == 0 || init.total_size > cfg.max_transfer_bytes as u64 {
        return Err(PairingError::Validation(format!(
            "Total size must be between 1 and {}, got {}",
            cfg.max_transfer_bytes, init.total_size
        )));
    }
    validate_hex(&init.checksum, cfg.checksum_length, "Checksum")
}

/// Валидация TRANSFER_CHUNK относительно объявленной передачи
pub fn validate_chunk(chunk: &TransferChunkPayload, init: &InitTransferPayload) -> Result<()> {
    if chunk.transfer_id != init.transfer_id {
        return Err(PairingError::Validation(format!(
            "Chunk belongs to transfer {}, expected {}",
            chunk.transfer_id, init.transfer_id
        )));
    }
    if chunk.chunk_index >= init.total_chunks {
        return Err(PairingError::Validation(format!(
            "Chunk index {} out of range 0..{}",
            chunk.chunk_index, init.total_chunks
        )));
    }
    Ok(())
}
