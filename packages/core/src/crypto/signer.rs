//! Подпись identity-proof для QR и push-переподключений
//!
//! Каноническое сообщение: `lowercase(sessionId || persistentPubHex || ephemeralPubHex)`,
//! подпись ECDSA-SHA256 в формате `r || s`, hex. Ключи в сообщении всегда в сжатой форме.

use crate::crypto::keys::{KeyMaterial, SecretBytes};
use crate::crypto::provider::CryptoProvider;
use crate::error::CryptoError;
use std::marker::PhantomData;

pub struct Signer<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> Signer<P> {
    /// Порядок полей важен, проверяющая сторона собирает строку так же
    pub fn canonical_message(
        session_id: &str,
        persistent_public_key: &[u8],
        ephemeral_public_key: &[u8],
    ) -> String {
        format!(
            "{}{}{}",
            session_id,
            hex::encode(persistent_public_key),
            hex::encode(ephemeral_public_key)
        )
        .to_lowercase()
    }

    pub fn sign(
        session_id: &str,
        own_persistent_public_key: &[u8],
        peer_ephemeral_public_key: &[u8],
        persistent_private_key: &SecretBytes,
    ) -> Result<String, CryptoError> {
        let persistent = KeyMaterial::<P>::compress(own_persistent_public_key)
            .map_err(|e| CryptoError::SigningError(format!("Persistent key: {}", e)))?;
        let ephemeral = KeyMaterial::<P>::compress(peer_ephemeral_public_key)
            .map_err(|e| CryptoError::SigningError(format!("Ephemeral key: {}", e)))?;

        let message = Self::canonical_message(session_id, &persistent, &ephemeral);
        let private_key = P::private_key_from_bytes(persistent_private_key.as_bytes())
            .map_err(|e| CryptoError::SigningError(format!("Key import failed: {}", e)))?;
        let signature = P::sign(&private_key, message.as_bytes())?;
        Ok(hex::encode(signature))
    }

    pub fn verify(
        signature_hex: &str,
        persistent_public_key: &[u8],
        ephemeral_public_key: &[u8],
        session_id: &str,
    ) -> Result<(), CryptoError> {
        let signature = hex::decode(signature_hex.trim())
            .map_err(|e| CryptoError::SignatureVerificationError(format!("Invalid hex: {}", e)))?;
        let persistent = KeyMaterial::<P>::compress(persistent_public_key)
            .map_err(|e| CryptoError::SignatureVerificationError(e.to_string()))?;
        let ephemeral = KeyMaterial::<P>::compress(ephemeral_public_key)
            .map_err(|e| CryptoError::SignatureVerificationError(e.to_string()))?;

        let message = Self::canonical_message(session_id, &persistent, &ephemeral);
        P::verify(&persistent, message.as_bytes(), &signature)
    }

    /// Подпись произвольных канонических байтов (push wake-запрос)
    pub fn sign_bytes(private_key: &SecretBytes, message: &[u8]) -> Result<String, CryptoError> {
        let private_key = P::private_key_from_bytes(private_key.as_bytes())
            .map_err(|e| CryptoError::SigningError(format!("Key import failed: {}", e)))?;
        Ok(hex::encode(P::sign(&private_key, message)?))
    }

    pub fn verify_bytes(
        public_key: &[u8],
        message: &[u8],
        signature_hex: &str,
    ) -> Result<(), CryptoError> {
        let signature = hex::decode(signature_hex.trim())
            .map_err(|e| CryptoError::SignatureVerificationError(format!("Invalid hex: {}", e)))?;
        P::verify(public_key, message, &signature)
    }
}
