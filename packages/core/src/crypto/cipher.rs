// AES-256-GCM конверт: nonce(12) || ciphertext || tag(16)

use crate::crypto::keys::AesKey;
use crate::crypto::provider::CryptoProvider;
use crate::error::CryptoError;
use std::marker::PhantomData;

const TAG_LEN: usize = 16;

pub struct PayloadCipher<P: CryptoProvider> {
    _phantom: PhantomData<P>,
}

impl<P: CryptoProvider> PayloadCipher<P> {
    pub fn seal(key: &AesKey, plaintext: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let key = P::aead_key_from_bytes(key.as_bytes())?;
        let nonce = P::random_bytes(crate::config::Config::global().nonce_length);
        let ciphertext = P::aead_encrypt(&key, &nonce, plaintext, aad)?;

        let mut envelope = Vec::with_capacity(nonce.len() + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    pub fn open(key: &AesKey, envelope: &[u8], aad: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let nonce_len = crate::config::Config::global().nonce_length;
        if envelope.len() < nonce_len + TAG_LEN {
            return Err(CryptoError::AeadDecryptionError(format!(
                "Envelope too short: {} bytes",
                envelope.len()
            )));
        }
        let key = P::aead_key_from_bytes(key.as_bytes())
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?;
        let (nonce, ciphertext) = envelope.split_at(nonce_len);
        P::aead_decrypt(&key, nonce, ciphertext, aad)
    }

    pub fn seal_b64(key: &AesKey, plaintext: &[u8], aad: Option<&[u8]>) -> Result<String, CryptoError> {
        Ok(crate::utils::b64::encode(&Self::seal(key, plaintext, aad)?))
    }

    pub fn open_b64(key: &AesKey, envelope: &str, aad: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let bytes = crate::utils::b64::decode(envelope)
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?;
        Self::open(key, &bytes, aad)
    }

    /// SHA-256 контрольная сумма передачи
    pub fn checksum(data: &[u8]) -> Vec<u8> {
        P::digest(data)
    }
}
