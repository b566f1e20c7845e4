//! Сборка чанков передачи
//!
//! Чанки приходят в любом порядке. Буфер хранит слоты по индексу и счётчик
//! заполненных, поэтому завершённость проверяется без пересканирования.
//! После сборки: конкатенация по индексу, проверка размера и SHA-256, затем
//! gunzip с ограничением на размер результата.

use crate::config::Config;
use crate::crypto::PairingCipher;
use crate::protocol::messages::{InitTransferPayload, TransferChunkPayload};
use crate::utils::b64;
use crate::utils::error::{PairingError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

#[derive(Debug)]
pub struct ChunkAssembler {
    transfer_id: String,
    expected_checksum: Vec<u8>,
    /// Объявленный размер сжатого потока
    expected_size: Option<u64>,
    max_output: usize,
    slots: Vec<Option<Vec<u8>>>,
    filled: usize,
}

impl ChunkAssembler {
    pub fn new(transfer_id: impl Into<String>, total_chunks: u32, expected_checksum: Vec<u8>) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            expected_checksum,
            expected_size: None,
            max_output: Config::global().max_transfer_bytes,
            slots: vec![None; total_chunks as usize],
            filled: 0,
        }
    }

    /// Из провалидированного INIT_TRANSFER
    pub fn from_init(init: &InitTransferPayload) -> Result<Self> {
        let checksum = hex::decode(&init.checksum)
            .map_err(|_| PairingError::Validation("Checksum is not valid hex".to_string()))?;
        let mut assembler = Self::new(init.transfer_id.clone(), init.total_chunks, checksum);
        assembler.expected_size = Some(init.total_size);
        Ok(assembler)
    }

    /// Предел распакованного размера вместо `max_transfer_bytes` из конфигурации
    pub fn with_max_output(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    pub fn total_chunks(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn received(&self) -> usize {
        self.filled
    }

    /// Записать чанк. Повторная запись того же индекса перезаписывает слот.
    pub fn put(&mut self, index: u32, bytes: Vec<u8>) -> Result<()> {
        let total = self.slots.len();
        let slot = self.slots.get_mut(index as usize).ok_or_else(|| {
            PairingError::Validation(format!("Chunk index {} out of range 0..{}", index, total))
        })?;
        if bytes.is_empty() {
            return Err(PairingError::Validation(format!("Chunk {} is empty", index)));
        }

        if slot.is_none() {
            self.filled += 1;
        }
        *slot = Some(bytes);
        Ok(())
    }

    /// Записать чанк из TRANSFER_CHUNK (base64)
    pub fn put_payload(&mut self, chunk: &TransferChunkPayload) -> Result<()> {
        let bytes = b64::decode(&chunk.chunk_data)?;
        self.put(chunk.chunk_index, bytes)
    }

    /// Все индексы 0..total заполнены
    pub fn is_complete(&self) -> bool {
        !self.slots.is_empty() && self.filled == self.slots.len()
    }

    /// Прогресс 0..=100
    pub fn progress(&self) -> u8 {
        if self.slots.is_empty() {
            return 0;
        }
        ((self.filled * 100) / self.slots.len()) as u8
    }

    /// Собрать, проверить контрольную сумму и распаковать.
    /// Буфер после этого уничтожается.
    pub fn finalize(self) -> Result<Vec<u8>> {
        use tracing::debug;

        if !self.is_complete() {
            return Err(PairingError::Validation(format!(
                "Transfer incomplete: {}/{} chunks",
                self.filled,
                self.slots.len()
            )));
        }

        let mut assembled = Vec::new();
        for bytes in self.slots.into_iter().flatten() {
            assembled.extend_from_slice(&bytes);
        }

        if let Some(size) = self.expected_size {
            if assembled.len() as u64 != size {
                return Err(PairingError::Validation(format!(
                    "Transfer size mismatch: announced {}, received {}",
                    size,
                    assembled.len()
                )));
            }
        }

        let checksum = PairingCipher::checksum(&assembled);
        if checksum != self.expected_checksum {
            return Err(PairingError::ChecksumMismatch);
        }

        // Читаем на байт больше предела, чтобы отличить ровно предел от превышения
        let mut decompressed = Vec::new();
        GzDecoder::new(assembled.as_slice())
            .take(self.max_output as u64 + 1)
            .read_to_end(&mut decompressed)
            .map_err(|e| PairingError::Decompression(e.to_string()))?;
        if decompressed.len() > self.max_output {
            return Err(PairingError::Decompression(format!(
                "Transfer inflates beyond {} bytes",
                self.max_output
            )));
        }

        debug!(
            target: "protocol::transfer",
            transfer_id = %self.transfer_id,
            compressed = assembled.len(),
            size = decompressed.len(),
            "Transfer assembled"
        );
        Ok(decompressed)
    }
}

/// Сжать данные gzip
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PairingError::Serialization(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PairingError::Serialization(e.to_string()))
}

/// Отправляющая сторона: сжать, посчитать контрольную сумму и нарезать на чанки
pub fn prepare_transfer(
    transfer_id: &str,
    data: &[u8],
    chunk_size: usize,
) -> Result<(InitTransferPayload, Vec<TransferChunkPayload>)> {
    if chunk_size == 0 {
        return Err(PairingError::Validation("Chunk size must be positive".to_string()));
    }

    let compressed = compress(data)?;
    let checksum = hex::encode(PairingCipher::checksum(&compressed));

    let chunks: Vec<TransferChunkPayload> = compressed
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, bytes)| TransferChunkPayload {
            transfer_id: transfer_id.to_string(),
            chunk_index: index as u32,
            chunk_data: b64::encode(bytes),
        })
        .collect();

    let init = InitTransferPayload {
        transfer_id: transfer_id.to_string(),
        total_chunks: chunks.len() as u32,
        total_size: compressed.len() as u64,
        checksum,
    };
    Ok((init, chunks))
}
