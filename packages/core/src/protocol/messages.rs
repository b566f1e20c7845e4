// Типы фреймов протокола сопряжения
// JSON через relay: {id, action, payload, scheme?, origin?, originVersion?}

use crate::storage::models::SecurityTier;
use crate::utils::error::{PairingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Идентификатор действия фрейма
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Hello,
    Challenge,
    PullRequest,
    PullRequestAction,
    InitTransfer,
    TransferChunk,
    CloseWithSuccess,
    CloseWithError,
    // Только исходящие подтверждения
    InitTransferConfirmed,
    PullRequestCompleted,
}

impl Action {
    pub const ALL: [Action; 10] = [
        Action::Hello,
        Action::Challenge,
        Action::PullRequest,
        Action::PullRequestAction,
        Action::InitTransfer,
        Action::TransferChunk,
        Action::CloseWithSuccess,
        Action::CloseWithError,
        Action::InitTransferConfirmed,
        Action::PullRequestCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Hello => "hello",
            Action::Challenge => "challenge",
            Action::PullRequest => "pullRequest",
            Action::PullRequestAction => "pullRequestAction",
            Action::InitTransfer => "initTransfer",
            Action::TransferChunk => "transferChunk",
            Action::CloseWithSuccess => "closeWithSuccess",
            Action::CloseWithError => "closeWithError",
            Action::InitTransferConfirmed => "initTransferConfirmed",
            Action::PullRequestCompleted => "pullRequestCompleted",
        }
    }

    /// Неизвестная строка действия это `UnknownAction`
    pub fn parse(value: &str) -> Result<Action> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == value)
            .ok_or_else(|| PairingError::UnknownAction(value.to_string()))
    }

    /// Фреймы, которые клиент только отправляет
    pub fn is_outbound_only(&self) -> bool {
        matches!(
            self,
            Action::InitTransferConfirmed | Action::PullRequestCompleted
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Фрейм протокола
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    pub action: Action,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scheme: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub origin_version: Option<String>,
}

impl Frame {
    /// Разобрать payload в типизированную структуру
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            PairingError::Validation(format!("Invalid {} payload: {}", self.action, e))
        })
    }
}

/// Входящий фрейм до проверки действия
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawFrame {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub scheme: Option<u32>,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub origin_version: Option<String>,
}

// ============================================================================
// Handshake
// ============================================================================

/// HELLO от пира
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub device_id: String,
    pub device_name: String,
    pub device_platform: String,
    /// Hex сжатого эфемерного ключа пира
    pub device_public_key: String,
}

/// CHALLENGE от клиента: соль HKDF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub hkdf_salt: String,
}

/// Зашифрованная полезная нагрузка (base64 AES-GCM конверта)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub data: String,
}

// ============================================================================
// Pull request
// ============================================================================

/// Тип запроса к пиру
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PullRequestKind {
    SifRequest,
    AddData,
    UpdateData,
    DeleteData,
    FullSync,
}

impl fmt::Display for PullRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PullRequestKind::SifRequest => "sifRequest",
            PullRequestKind::AddData => "addData",
            PullRequestKind::UpdateData => "updateData",
            PullRequestKind::DeleteData => "deleteData",
            PullRequestKind::FullSync => "fullSync",
        };
        f.write_str(name)
    }
}

/// Статус, с которым пир ответил на запрос
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionStatus {
    Cancel,
    Accept,
    AddedInT1,
    AddedInAnotherVault,
    Added,
    Updated,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionStatus::Cancel => "cancel",
            ActionStatus::Accept => "accept",
            ActionStatus::AddedInT1 => "addedInT1",
            ActionStatus::AddedInAnotherVault => "addedInAnotherVault",
            ActionStatus::Added => "added",
            ActionStatus::Updated => "updated",
        };
        f.write_str(name)
    }
}

/// Расшифрованный PULL_REQUEST (клиент -> пир)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestPayload {
    pub action: PullRequestKind,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Расшифрованный PULL_REQUEST_ACTION (пир -> клиент)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestAction {
    pub action: PullRequestKind,
    pub status: ActionStatus,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PullRequestAction {
    /// Допустимые комбинации тип/статус
    pub fn validate(&self) -> Result<()> {
        use ActionStatus::*;
        use PullRequestKind::*;

        let allowed = match self.action {
            SifRequest => matches!(self.status, Cancel | Accept),
            AddData => matches!(self.status, Cancel | Added | AddedInT1 | AddedInAnotherVault),
            UpdateData => matches!(self.status, Cancel | Updated),
            DeleteData => matches!(self.status, Cancel | Accept),
            FullSync => matches!(self.status, Cancel | Accept),
        };

        if allowed {
            Ok(())
        } else {
            Err(PairingError::InvalidAction(format!(
                "{} with status {}",
                self.action, self.status
            )))
        }
    }

    /// Только полная синхронизация идёт через чанки
    pub fn expects_transfer(&self) -> bool {
        self.action == PullRequestKind::FullSync && self.status == ActionStatus::Accept
    }
}

/// Секрет одного элемента, запрошенный по требованию
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SifData {
    pub item_id: String,
    pub tier: SecurityTier,
    /// base64 AES-GCM конверта под ключом элемента
    pub secret: String,
}

/// Элемент для добавления/обновления
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemData {
    pub id: String,
    #[serde(default)]
    pub vault_id: Option<String>,
    pub tier: SecurityTier,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// base64 AES-GCM конверта под ключом элемента
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItemData {
    pub item_id: String,
}

/// Содержимое полной синхронизации после сборки чанков
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncData {
    pub items: Vec<ItemData>,
}

// ============================================================================
// Transfer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitTransferPayload {
    pub transfer_id: String,
    pub total_chunks: u32,
    pub total_size: u64,
    /// Hex SHA-256 от конкатенации сжатых чанков
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunkPayload {
    pub transfer_id: String,
    pub chunk_index: u32,
    /// base64 среза gzip-потока
    pub chunk_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitTransferConfirmedPayload {
    pub transfer_id: String,
}

/// Подтверждение обработки запроса, несёт id исходного фрейма
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestCompletedPayload {
    pub message_id: String,
}

// ============================================================================
// Close
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}
