// Типы ошибок сессии сопряжения

use crate::error::CryptoError;
use crate::protocol::transport::CloseCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailure(String),

    #[error("Signature failure: {0}")]
    SignatureFailure(String),

    #[error("A pairing session is already open")]
    InstanceExists,

    #[error("Unexpected action {action} in state {state}")]
    UnexpectedAction { action: String, state: String },

    #[error("Transfer checksum mismatch")]
    ChecksumMismatch,

    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("No activity within {0} ms")]
    Timeout(u64),

    #[error("Peer closed the session with error {code}: {message}")]
    PeerClosedWithError { code: u16, message: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Peer scheme {peer} is not supported (max {supported})")]
    SchemeMismatch { peer: u32, supported: u32 },

    #[error("Connection closed with code {code}")]
    ConnectionClosed { code: u16 },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Item not found: {0}")]
    MissingItem(String),

    #[error("Wrong tier for item {item_id}: {reason}")]
    WrongTier { item_id: String, reason: String },

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, PairingError>;

/// Категория сообщения для пользователя
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessage {
    Generic,
    Timeout,
    PeerDisconnected,
    UpdateRequired,
    Declined,
    Busy,
    /// Сессию закрыли на этой стороне
    Cancelled,
}

impl UserMessage {
    pub fn text(&self) -> &'static str {
        match self {
            UserMessage::Generic => "Something went wrong while connecting. Please try again.",
            UserMessage::Timeout => "The connection timed out. Please try again.",
            UserMessage::PeerDisconnected => "Your phone disconnected. Please try again.",
            UserMessage::UpdateRequired => "Please update the app on your phone to continue.",
            UserMessage::Declined => "The request was declined on your phone.",
            UserMessage::Busy => "Another connection is in progress. Please wait a moment.",
            UserMessage::Cancelled => "The connection was cancelled.",
        }
    }
}

impl PairingError {
    /// Код закрытия сокета, который отправляется пиру
    pub fn close_code(&self) -> CloseCode {
        match self {
            PairingError::Timeout(_) => CloseCode::Timeout,
            PairingError::UnexpectedAction { .. }
            | PairingError::UnknownAction(_)
            | PairingError::InvalidAction(_)
            | PairingError::Serialization(_)
            | PairingError::Validation(_) => CloseCode::ProtocolError,
            PairingError::ChecksumMismatch
            | PairingError::DecryptionFailure(_)
            | PairingError::SignatureFailure(_)
            | PairingError::KeyDerivationFailure(_) => CloseCode::PolicyViolation,
            PairingError::SchemeMismatch { .. } => CloseCode::SchemeMismatch,
            PairingError::PeerClosedWithError { .. } | PairingError::ConnectionClosed { .. } => {
                CloseCode::PeerDisconnected
            }
            PairingError::Cancelled => CloseCode::Cancelled,
            _ => CloseCode::InternalError,
        }
    }

    /// Категория сообщения, которое показывается пользователю
    pub fn user_message(&self) -> UserMessage {
        match self {
            PairingError::Timeout(_) => UserMessage::Timeout,
            PairingError::PeerClosedWithError { .. } => UserMessage::PeerDisconnected,
            PairingError::ConnectionClosed { code } => match CloseCode::from_u16(*code) {
                Some(CloseCode::Abnormal) | Some(CloseCode::PeerDisconnected) => {
                    UserMessage::PeerDisconnected
                }
                Some(CloseCode::Timeout) => UserMessage::Timeout,
                Some(CloseCode::SchemeMismatch) => UserMessage::UpdateRequired,
                _ => UserMessage::Generic,
            },
            PairingError::SchemeMismatch { .. } => UserMessage::UpdateRequired,
            PairingError::InstanceExists => UserMessage::Busy,
            PairingError::Cancelled => UserMessage::Cancelled,
            _ => UserMessage::Generic,
        }
    }

    /// Ошибки, о которых пир уже знает, не требуют CLOSE_WITH_ERROR
    pub fn reported_by_peer(&self) -> bool {
        matches!(
            self,
            PairingError::PeerClosedWithError { .. } | PairingError::ConnectionClosed { .. }
        )
    }

    pub fn unexpected(action: impl ToString, state: impl ToString) -> Self {
        PairingError::UnexpectedAction {
            action: action.to_string(),
            state: state.to_string(),
        }
    }
}

impl From<CryptoError> for PairingError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::SigningError(e) | CryptoError::SignatureVerificationError(e) => {
                PairingError::SignatureFailure(e)
            }
            CryptoError::AeadDecryptionError(e) => PairingError::DecryptionFailure(e),
            other => PairingError::KeyDerivationFailure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PairingError {
    fn from(error: serde_json::Error) -> Self {
        PairingError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for PairingError {
    fn from(error: bincode::Error) -> Self {
        PairingError::Serialization(error.to_string())
    }
}

// Для WASM-биндингов
#[cfg(target_arch = "wasm32")]
impl From<PairingError> for wasm_bindgen::JsValue {
    fn from(error: PairingError) -> Self {
        wasm_bindgen::JsValue::from_str(error.user_message().text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_message() {
        let errors = vec![
            PairingError::KeyDerivationFailure("x".into()),
            PairingError::SignatureFailure("x".into()),
            PairingError::InstanceExists,
            PairingError::unexpected("hello", "Idle"),
            PairingError::ChecksumMismatch,
            PairingError::DecryptionFailure("x".into()),
            PairingError::Timeout(10),
            PairingError::PeerClosedWithError { code: 4000, message: "x".into() },
            PairingError::UnknownAction("x".into()),
        ];

        for error in errors {
            assert!(!error.user_message().text().is_empty());
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_timeout_vs_generic() {
        assert_eq!(PairingError::Timeout(1).user_message(), UserMessage::Timeout);
        assert_eq!(PairingError::ChecksumMismatch.user_message(), UserMessage::Generic);
        assert_eq!(
            PairingError::ConnectionClosed { code: 1006 }.user_message(),
            UserMessage::PeerDisconnected
        );
        assert_eq!(
            PairingError::ConnectionClosed { code: 1000 }.user_message(),
            UserMessage::Generic
        );
    }

    #[test]
    fn test_local_cancel_is_not_a_decline() {
        assert_eq!(PairingError::Cancelled.user_message(), UserMessage::Cancelled);
        assert_ne!(UserMessage::Cancelled.text(), UserMessage::Declined.text());
    }

    #[test]
    fn test_crypto_error_mapping() {
        let e: PairingError = CryptoError::SigningError("bad key".into()).into();
        assert!(matches!(e, PairingError::SignatureFailure(_)));

        let e: PairingError = CryptoError::AeadDecryptionError("tag".into()).into();
        assert!(matches!(e, PairingError::DecryptionFailure(_)));

        let e: PairingError = CryptoError::InvalidPublicKey("curve".into()).into();
        assert!(matches!(e, PairingError::KeyDerivationFailure(_)));
    }
}
