use crate::crypto::keys::SecretBytes;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::P256_SUITE_ID;
use crate::error::CryptoError;
use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, KeyInit, Nonce,
};
use hkdf::Hkdf;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand_core::RngCore;
use sha2::{Digest, Sha256};

const NONCE_LEN: usize = 12;
const AES_KEY_LEN: usize = 32;

/// Concrete implementation of `CryptoProvider` on NIST P-256.
pub struct P256Suite;

impl P256Suite {
    fn secret_key(private_key: &SecretBytes) -> Result<SecretKey, CryptoError> {
        SecretKey::from_slice(private_key.as_ref())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))
    }

    fn public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        PublicKey::from_sec1_bytes(bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl CryptoProvider for P256Suite {
    type PublicKey = Vec<u8>;
    type PrivateKey = SecretBytes;
    type AeadKey = SecretBytes;

    fn generate_keys() -> Result<(Self::PrivateKey, Self::PublicKey), CryptoError> {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(true);
        Ok((
            SecretBytes::new(secret.to_bytes().to_vec()),
            public.as_bytes().to_vec(),
        ))
    }

    fn public_from_private(private_key: &Self::PrivateKey) -> Result<Self::PublicKey, CryptoError> {
        let secret = Self::secret_key(private_key)?;
        Ok(secret.public_key().to_encoded_point(true).as_bytes().to_vec())
    }

    fn private_key_from_bytes(bytes: &[u8]) -> Result<Self::PrivateKey, CryptoError> {
        // Проверяем, что скаляр валиден для кривой
        SecretKey::from_slice(bytes).map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(SecretBytes::new(bytes.to_vec()))
    }

    fn aead_key_from_bytes(bytes: &[u8]) -> Result<Self::AeadKey, CryptoError> {
        if bytes.len() != AES_KEY_LEN {
            return Err(CryptoError::InvalidInputError(format!(
                "AES key must be {} bytes, got {}",
                AES_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(SecretBytes::new(bytes.to_vec()))
    }

    fn compress_public_key(bytes: &[u8]) -> Result<Self::PublicKey, CryptoError> {
        let public = Self::public_key(bytes)?;
        Ok(public.to_encoded_point(true).as_bytes().to_vec())
    }

    fn decompress_public_key(public_key: &Self::PublicKey) -> Result<Vec<u8>, CryptoError> {
        let public = Self::public_key(public_key)?;
        Ok(public.to_encoded_point(false).as_bytes().to_vec())
    }

    fn key_agreement(
        private_key: &Self::PrivateKey,
        peer_public_key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let secret = Self::secret_key(private_key)?;
        let peer = Self::public_key(peer_public_key)
            .map_err(|e| CryptoError::KeyAgreementError(e.to_string()))?;

        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        Ok(shared.raw_secret_bytes().to_vec())
    }

    fn sign(private_key: &Self::PrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signing_key = SigningKey::from_slice(private_key.as_ref())
            .map_err(|e| CryptoError::SigningError(format!("Key import failed: {}", e)))?;
        let signature: Signature = signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| CryptoError::SignatureVerificationError(format!("Malformed signature: {}", e)))?;

        verifying_key
            .verify(message, &signature)
            .map_err(|e| CryptoError::SignatureVerificationError(e.to_string()))
    }

    fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ikm.is_empty() {
            return Err(CryptoError::KeyDerivationError("Empty input key material".to_string()));
        }
        let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
        Ok(prk.to_vec())
    }

    fn hkdf_expand(prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
        let hkdf = Hkdf::<Sha256>::from_prk(prk)
            .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
        let mut okm = vec![0u8; len];
        hkdf.expand(info, &mut okm)?;
        Ok(okm)
    }

    fn aead_encrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::InvalidInputError("Invalid nonce length".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;

        let payload = Payload {
            msg: plaintext,
            aad: associated_data.unwrap_or(b""),
        };

        cipher
            .encrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))
    }

    fn aead_decrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::AeadDecryptionError("Invalid nonce length".to_string()));
        }
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))?;

        let payload = Payload {
            msg: ciphertext,
            aad: associated_data.unwrap_or(b""),
        };

        cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|e| CryptoError::AeadDecryptionError(e.to_string()))
    }

    fn digest(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        OsRng.fill_bytes(&mut bytes);
        bytes
    }

    fn suite_id() -> u16 {
        P256_SUITE_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_roundtrip() {
        let (_, public) = P256Suite::generate_keys().unwrap();
        assert_eq!(public.len(), 33);

        let uncompressed = P256Suite::decompress_public_key(&public).unwrap();
        assert_eq!(uncompressed.len(), 65);
        assert_eq!(P256Suite::compress_public_key(&uncompressed).unwrap(), public);
    }

    #[test]
    fn test_ecdh_is_symmetric() {
        let (a_priv, a_pub) = P256Suite::generate_keys().unwrap();
        let (b_priv, b_pub) = P256Suite::generate_keys().unwrap();

        let ab = P256Suite::key_agreement(&a_priv, &b_pub).unwrap();
        let ba = P256Suite::key_agreement(&b_priv, &a_pub).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 32);
    }

    #[test]
    fn test_ecdh_rejects_malformed_peer() {
        let (a_priv, _) = P256Suite::generate_keys().unwrap();
        // x-координата больше модуля поля
        let mut bad = vec![0x02u8];
        bad.extend_from_slice(&[0xff; 32]);
        let result = P256Suite::key_agreement(&a_priv, &bad);
        assert!(matches!(result, Err(CryptoError::KeyAgreementError(_))));

        let result = P256Suite::key_agreement(&a_priv, &[1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_aead_tamper_detected() {
        let key = P256Suite::aead_key_from_bytes(&[7u8; 32]).unwrap();
        let nonce = [1u8; 12];
        let mut ct = P256Suite::aead_encrypt(&key, &nonce, b"secret", Some(&b"ad"[..])).unwrap();

        assert_eq!(
            P256Suite::aead_decrypt(&key, &nonce, &ct, Some(&b"ad"[..])).unwrap(),
            b"secret"
        );
        assert!(P256Suite::aead_decrypt(&key, &nonce, &ct, Some(&b"other"[..])).is_err());

        ct[0] ^= 0xff;
        assert!(P256Suite::aead_decrypt(&key, &nonce, &ct, Some(&b"ad"[..])).is_err());
    }
}
