use thiserror::Error;

/// Ошибки криптографических примитивов (P-256, HKDF, AES-GCM)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate keys: {0}")]
    KeyGenerationError(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("Key agreement failed: {0}")]
    KeyAgreementError(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),
    #[error("Signing failed: {0}")]
    SigningError(String),
    #[error("Signature verification failed: {0}")]
    SignatureVerificationError(String),
    #[error("AEAD encryption failed: {0}")]
    AeadEncryptionError(String),
    #[error("AEAD decryption failed: {0}")]
    AeadDecryptionError(String),
    #[error("Invalid input: {0}")]
    InvalidInputError(String),
}

impl From<p256::elliptic_curve::Error> for CryptoError {
    fn from(err: p256::elliptic_curve::Error) -> Self {
        CryptoError::InvalidPublicKey(err.to_string())
    }
}

impl From<p256::ecdsa::Error> for CryptoError {
    fn from(err: p256::ecdsa::Error) -> Self {
        CryptoError::SigningError(err.to_string())
    }
}

impl From<hkdf::InvalidLength> for CryptoError {
    fn from(err: hkdf::InvalidLength) -> Self {
        CryptoError::KeyDerivationError(err.to_string())
    }
}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        CryptoError::InvalidInputError(format!("Invalid hex: {}", err))
    }
}
