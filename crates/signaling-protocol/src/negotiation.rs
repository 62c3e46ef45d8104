//! Typed negotiation payloads.
//!
//! The relay treats `sdp` and `candidate` as opaque JSON. Clients give
//! them these shapes, which match what browser media stacks produce:
//! `{"type": "offer", "sdp": "..."}` and
//! `{"candidate": "...", "sdpMid": "0", "sdpMLineIndex": 0}`.

use crate::codec::CodecError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which half of the offer/answer exchange a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description produced or consumed by the media stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Interpret a relayed `sdp` value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidPayload` if the value is not a session
    /// description or if its kind is not `expected`.
    pub fn from_value(value: &Value, expected: SdpKind) -> Result<Self, CodecError> {
        let desc = Self::deserialize(value)
            .map_err(|e| CodecError::InvalidPayload(format!("session description: {e}")))?;
        if desc.kind != expected {
            return Err(CodecError::InvalidPayload(format!(
                "expected {expected:?} description, got {:?}",
                desc.kind
            )));
        }
        Ok(desc)
    }

    /// JSON form for the `sdp` field of an outgoing event.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if serialization fails.
    pub fn to_value(&self) -> Result<Value, CodecError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// One transport candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    #[must_use]
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }

    /// Interpret a relayed `candidate` value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::InvalidPayload` if the value is not a candidate.
    pub fn from_value(value: &Value) -> Result<Self, CodecError> {
        Self::deserialize(value)
            .map_err(|e| CodecError::InvalidPayload(format!("ice candidate: {e}")))
    }

    /// JSON form for the `candidate` field of an outgoing event.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if serialization fails.
    pub fn to_value(&self) -> Result<Value, CodecError> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_description_from_browser_shape() {
        let value = json!({"type": "offer", "sdp": "v=0\r\n"});
        let desc = SessionDescription::from_value(&value, SdpKind::Offer).unwrap();
        assert_eq!(desc, SessionDescription::offer("v=0\r\n"));
        assert_eq!(desc.to_value().unwrap(), value);
    }

    #[test]
    fn test_description_kind_mismatch_rejected() {
        let value = json!({"type": "answer", "sdp": "v=0"});
        let err = SessionDescription::from_value(&value, SdpKind::Offer).unwrap_err();
        assert!(matches!(err, CodecError::InvalidPayload(_)));
    }

    #[test]
    fn test_description_garbage_rejected() {
        for value in [json!("v=0"), json!({"sdp": 5}), json!(null)] {
            assert!(SessionDescription::from_value(&value, SdpKind::Answer).is_err());
        }
    }

    #[test]
    fn test_candidate_field_names() {
        let value = json!({
            "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 54321 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        let candidate = IceCandidate::from_value(&value).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_m_line_index, Some(0));
        assert_eq!(candidate.to_value().unwrap(), value);
    }

    #[test]
    fn test_candidate_optional_fields_omitted() {
        let value = IceCandidate::new("candidate:x").to_value().unwrap();
        assert_eq!(value, json!({"candidate": "candidate:x"}));
    }
}
