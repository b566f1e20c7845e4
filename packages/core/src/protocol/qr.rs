// QR / identity payload
// base64("<scheme>:<sessionID>:<persistentPubHex>:<ephemeralPubHex>:<signatureHex>")

use crate::crypto::keys::{EphemeralSession, PersistentIdentity};
use crate::crypto::PairingSigner;
use crate::protocol::validation;
use crate::utils::b64;
use crate::utils::error::{PairingError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    pub scheme: u32,
    pub session_id: String,
    pub persistent_public_key: Vec<u8>,
    pub ephemeral_public_key: Vec<u8>,
    pub signature: String,
}

impl QrPayload {
    /// Собрать и подписать payload для новой сессии
    pub fn build(
        scheme: u32,
        session_id: &str,
        identity: &PersistentIdentity,
        ephemeral: &EphemeralSession,
    ) -> Result<Self> {
        let signature = PairingSigner::sign(
            session_id,
            identity.public_key(),
            ephemeral.public_key(),
            identity.private_key(),
        )?;

        Ok(Self {
            scheme,
            session_id: session_id.to_lowercase(),
            persistent_public_key: identity.public_key().to_vec(),
            ephemeral_public_key: ephemeral.public_key().to_vec(),
            signature,
        })
    }

    pub fn encode(&self) -> String {
        let text = format!(
            "{}:{}:{}:{}:{}",
            self.scheme,
            self.session_id,
            hex::encode(&self.persistent_public_key),
            hex::encode(&self.ephemeral_public_key),
            self.signature
        );
        b64::encode(text.as_bytes())
    }

    pub fn parse(encoded: &str) -> Result<Self> {
        let bytes = b64::decode(encoded)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| PairingError::Validation("QR payload is not UTF-8".to_string()))?;

        let parts: Vec<&str> = text.split(':').collect();
        if parts.len() != 5 {
            return Err(PairingError::Validation(format!(
                "QR payload must have 5 fields, got {}",
                parts.len()
            )));
        }

        let scheme = parts[0]
            .parse::<u32>()
            .map_err(|_| PairingError::Validation("Invalid QR scheme".to_string()))?;
        validation::validate_session_id(parts[1])?;
        let persistent_public_key = validation::validate_compressed_key(parts[2])?;
        let ephemeral_public_key = validation::validate_compressed_key(parts[3])?;
        validation::validate_hex(parts[4], 64, "Signature")?;

        Ok(Self {
            scheme,
            session_id: parts[1].to_string(),
            persistent_public_key,
            ephemeral_public_key,
            signature: parts[4].to_string(),
        })
    }

    /// Проверить подпись той же канонизацией, что и при подписи
    pub fn verify(&self) -> Result<()> {
        PairingSigner::verify(
            &self.signature,
            &self.persistent_public_key,
            &self.ephemeral_public_key,
            &self.session_id,
        )
        .map_err(|e| PairingError::SignatureFailure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PairingKeys;

    #[test]
    fn test_build_parse_verify() {
        let identity = PairingKeys::generate_identity().unwrap();
        let eph = PairingKeys::generate_ephemeral().unwrap();
        let session_id = "a1b2c3d4e5f60718293a4b5c6d7e8f90";

        let qr = QrPayload::build(1, session_id, &identity, &eph).unwrap();
        let parsed = QrPayload::parse(&qr.encode()).unwrap();

        assert_eq!(parsed, qr);
        assert!(parsed.verify().is_ok());
    }

    #[test]
    fn test_tampered_session_fails_verify() {
        let identity = PairingKeys::generate_identity().unwrap();
        let eph = PairingKeys::generate_ephemeral().unwrap();

        let mut qr =
            QrPayload::build(1, "a1b2c3d4e5f60718293a4b5c6d7e8f90", &identity, &eph).unwrap();
        qr.session_id = "a1b2c3d4e5f60718293a4b5c6d7e8f91".to_string();
        assert!(matches!(qr.verify(), Err(PairingError::SignatureFailure(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let encoded = b64::encode(b"1:abc:def");
        assert!(QrPayload::parse(&encoded).is_err());
    }
}
