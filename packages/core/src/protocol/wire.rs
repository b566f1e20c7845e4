// Wire format (JSON сериализация)
// Используется для передачи фреймов через relay

use crate::config::Config;
use crate::protocol::messages::{Action, Frame, RawFrame};
use crate::utils::error::{PairingError, Result};
use serde::Serialize;

/// Собрать исходящий фрейм: новый id, scheme/origin/originVersion из конфигурации
pub fn outbound<T: Serialize>(action: Action, payload: &T) -> Result<Frame> {
    let config = Config::global();
    Ok(Frame {
        id: crate::utils::uuid::generate_v4(),
        action,
        payload: serde_json::to_value(payload)?,
        scheme: Some(config.scheme),
        origin: Some(config.origin.clone()),
        origin_version: Some(config.origin_version.clone()),
    })
}

/// Упаковать фрейм в JSON (клиент -> relay)
pub fn encode_frame(frame: &Frame) -> Result<String> {
    serde_json::to_string(frame)
        .map_err(|e| PairingError::Serialization(format!("Frame encode error: {}", e)))
}

/// Распаковать JSON во фрейм (relay -> клиент)
pub fn decode_frame(data: &str) -> Result<Frame> {
    let limit = Config::global().max_frame_bytes;
    if data.len() > limit {
        return Err(PairingError::Validation(format!(
            "Frame of {} bytes exceeds limit of {}",
            data.len(),
            limit
        )));
    }

    let raw: RawFrame = serde_json::from_str(data)
        .map_err(|e| PairingError::Serialization(format!("Frame decode error: {}", e)))?;
    let action = Action::parse(&raw.action)?;

    Ok(Frame {
        id: raw.id,
        action,
        payload: raw.payload,
        scheme: raw.scheme,
        origin: raw.origin,
        origin_version: raw.origin_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ChallengeRequest;

    #[test]
    fn test_outbound_carries_identity() {
        let frame = outbound(
            Action::Challenge,
            &ChallengeRequest { hkdf_salt: "00".to_string() },
        )
        .unwrap();
        let json = encode_frame(&frame).unwrap();

        assert!(json.contains("\"action\":\"challenge\""));
        assert!(json.contains("\"originVersion\""));
        assert!(json.contains("\"hkdfSalt\":\"00\""));

        let decoded = decode_frame(&json).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_unknown_action() {
        let result = decode_frame(r#"{"id":"1","action":"selfDestruct","payload":{}}"#);
        assert!(matches!(result, Err(PairingError::UnknownAction(_))));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_frame("not json"),
            Err(PairingError::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let frame = decode_frame(r#"{"id":"1","action":"closeWithSuccess"}"#).unwrap();
        assert_eq!(frame.action, Action::CloseWithSuccess);
        assert!(frame.payload.is_null());
    }
}
