//! Криптографические наборы (Crypto Suites)
//!
//! ## Доступные наборы
//!
//! ### P-256 Suite
//! - **Key agreement**: ECDH на NIST P-256
//! - **Signatures**: ECDSA P-256 / SHA-256 (`r || s`)
//! - **AEAD**: AES-256-GCM
//! - **KDF**: HKDF-SHA256
//! - **Suite ID**: 1
//!
//! ```rust
//! use passlink_core::crypto::provider::CryptoProvider;
//! use passlink_core::crypto::suites::p256::P256Suite;
//!
//! let (private_key, public_key) = P256Suite::generate_keys().unwrap();
//! assert_eq!(public_key.len(), 33);
//! # let _ = private_key;
//! ```

pub mod p256;
