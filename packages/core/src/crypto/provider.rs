//! Defines the CryptoProvider trait for crypto-agility.

use crate::error::CryptoError;
use core::fmt::Debug;

/// Trait that formalizes all cryptographic operations of a pairing suite.
/// The same private key serves key agreement and signing, so the suite
/// exposes a single key pair type.
pub trait CryptoProvider: Send + Sync + 'static {
    type PublicKey: AsRef<[u8]> + Debug + Clone + 'static;
    type PrivateKey: AsRef<[u8]> + Clone + 'static;
    type AeadKey: AsRef<[u8]> + Clone + 'static;

    /// Generates a new key pair. The public key is returned in compressed form.
    fn generate_keys() -> Result<(Self::PrivateKey, Self::PublicKey), CryptoError>;

    /// Derives the compressed public key from a private key.
    fn public_from_private(private_key: &Self::PrivateKey) -> Result<Self::PublicKey, CryptoError>;

    fn private_key_from_bytes(bytes: &[u8]) -> Result<Self::PrivateKey, CryptoError>;

    fn aead_key_from_bytes(bytes: &[u8]) -> Result<Self::AeadKey, CryptoError>;

    /// Parses a public key in any SEC1 encoding and returns its compressed form.
    fn compress_public_key(bytes: &[u8]) -> Result<Self::PublicKey, CryptoError>;

    /// Expands a compressed public key back to its uncompressed SEC1 encoding.
    fn decompress_public_key(public_key: &Self::PublicKey) -> Result<Vec<u8>, CryptoError>;

    /// Raw ECDH shared secret between a private key and a peer public key.
    fn key_agreement(
        private_key: &Self::PrivateKey,
        peer_public_key: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Signs a message. Signatures are fixed-size `r || s`.
    fn sign(private_key: &Self::PrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Verifies a signature with the given public key.
    fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError>;

    /// HKDF-Extract: pseudo-random key from salt and input key material.
    fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// HKDF-Expand: output key material of `len` bytes for `info`.
    fn hkdf_expand(prk: &[u8], info: &[u8], len: usize) -> Result<Vec<u8>, CryptoError>;

    fn aead_encrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    fn aead_decrypt(
        key: &Self::AeadKey,
        nonce: &[u8],
        ciphertext: &[u8],
        associated_data: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    /// 32-byte digest used for transfer checksums.
    fn digest(data: &[u8]) -> Vec<u8>;

    /// Generates cryptographically secure random bytes.
    fn random_bytes(len: usize) -> Vec<u8>;

    /// Returns the SuiteID associated with this CryptoProvider.
    fn suite_id() -> u16;
}
