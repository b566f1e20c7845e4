//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │               PairingSession / RequestRouter                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                ┌─────────────┼─────────────┐
//!                ▼             ▼             ▼
//! ┌────────────────┐ ┌────────────────┐ ┌────────────────┐
//! │  KeyMaterial   │ │     Signer     │ │ PayloadCipher  │
//! │  identity      │ │  QR proof      │ │  AES-GCM       │
//! │  ECDH + HKDF   │ │  wake request  │ │  envelope      │
//! └────────────────┘ └────────────────┘ └────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CryptoProvider (Crypto-Agility)                │
//! │  - ECDH / ECDSA (P-256)                                     │
//! │  - AEAD (AES-256-GCM)                                       │
//! │  - KDF (HKDF-SHA256)                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// ============================================================================
// Core Traits
// ============================================================================

/// CryptoProvider trait для crypto-agility
pub mod provider;

// ============================================================================
// Implementations
// ============================================================================

/// Криптографические наборы
pub mod suites;

// ============================================================================
// Key material, подпись, шифрование
// ============================================================================

pub mod cipher;
pub mod keys;
pub mod signer;

// ============================================================================
// Re-exports для удобства
// ============================================================================

pub use provider::CryptoProvider;
pub use suites::p256::P256Suite;

pub type SuiteID = u16;

/// Suite ID for the P-256 suite
pub const P256_SUITE_ID: SuiteID = 1;

/// Набор, которым пользуется сессия
pub type ActiveSuite = P256Suite;

pub type PairingKeys = keys::KeyMaterial<ActiveSuite>;
pub type PairingSigner = signer::Signer<ActiveSuite>;
pub type PairingCipher = cipher::PayloadCipher<ActiveSuite>;
