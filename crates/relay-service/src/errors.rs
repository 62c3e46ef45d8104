//! Relay error types.
//!
//! Each error maps to a stable wire code carried in the `error` event.
//! Internal details are logged server-side but not exposed to clients.

use common::error::ValidationError;
use common::types::RoomCode;
use signaling_protocol::events::ErrorNotice;
use thiserror::Error;

/// Relay error type.
///
/// Wire codes:
/// - `RoomFull`: `ROOM_FULL`
/// - `Validation`: `INVALID_ROOM_CODE`, `INVALID_IDENTITY`, `INVALID_TARGET`
/// - `AlreadyInRoom`: `ALREADY_IN_ROOM`
/// - `NotInRoom`: `NOT_IN_ROOM`
/// - `Malformed`: `MALFORMED_MESSAGE`
/// - `CredentialProvider`: `ICE_UNAVAILABLE`
/// - `Config`, `Internal`: `INTERNAL_ERROR`
#[derive(Debug, Error)]
pub enum RelayError {
    /// Room already holds the capacity limit.
    #[error("Room {0} is full")]
    RoomFull(RoomCode),

    /// User-supplied value failed validation.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Session is already a member of another room.
    #[error("Session already in room {0}")]
    AlreadyInRoom(RoomCode),

    /// Room-scoped event from a session that has not joined.
    #[error("Session is not in a room")]
    NotInRoom,

    /// Frame could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Relay-credential provider failed or returned garbage.
    #[error("Credential provider error: {0}")]
    CredentialProvider(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the stable wire code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::RoomFull(_) => "ROOM_FULL",
            RelayError::Validation(ValidationError::InvalidRoomCode) => "INVALID_ROOM_CODE",
            RelayError::Validation(ValidationError::InvalidIdentity(_)) => "INVALID_IDENTITY",
            RelayError::Validation(ValidationError::InvalidSessionId) => "INVALID_TARGET",
            RelayError::AlreadyInRoom(_) => "ALREADY_IN_ROOM",
            RelayError::NotInRoom => "NOT_IN_ROOM",
            RelayError::Malformed(_) => "MALFORMED_MESSAGE",
            RelayError::CredentialProvider(_) => "ICE_UNAVAILABLE",
            RelayError::Config(_) | RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::RoomFull(_) => "Room is full".to_string(),
            RelayError::Validation(e) => e.to_string(),
            RelayError::AlreadyInRoom(_) => {
                "Leave the current room before joining another".to_string()
            }
            RelayError::NotInRoom => "Join a room first".to_string(),
            RelayError::Malformed(_) => "Malformed message".to_string(),
            RelayError::CredentialProvider(_) => "Failed to fetch ICE servers".to_string(),
            RelayError::Config(_) | RelayError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// The `error` event payload for this error.
    #[must_use]
    pub fn to_notice(&self) -> ErrorNotice {
        ErrorNotice {
            code: self.error_code().to_string(),
            message: self.client_message(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn room() -> RoomCode {
        RoomCode::parse("A1B2C3").unwrap()
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(RelayError::RoomFull(room()).error_code(), "ROOM_FULL");
        assert_eq!(
            RelayError::from(ValidationError::InvalidRoomCode).error_code(),
            "INVALID_ROOM_CODE"
        );
        assert_eq!(
            RelayError::from(ValidationError::InvalidIdentity("empty")).error_code(),
            "INVALID_IDENTITY"
        );
        assert_eq!(
            RelayError::from(ValidationError::InvalidSessionId).error_code(),
            "INVALID_TARGET"
        );
        assert_eq!(RelayError::AlreadyInRoom(room()).error_code(), "ALREADY_IN_ROOM");
        assert_eq!(RelayError::NotInRoom.error_code(), "NOT_IN_ROOM");
        assert_eq!(
            RelayError::Malformed("eof".to_string()).error_code(),
            "MALFORMED_MESSAGE"
        );
        assert_eq!(
            RelayError::CredentialProvider("503".to_string()).error_code(),
            "ICE_UNAVAILABLE"
        );
        assert_eq!(RelayError::Internal("x".to_string()).error_code(), "INTERNAL_ERROR");
        assert_eq!(RelayError::Config("x".to_string()).error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let internal = RelayError::Internal("outbox closed for 10.1.2.3".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");

        let provider = RelayError::CredentialProvider(
            "401 from https://turn.example.net with user mesh".to_string(),
        );
        assert!(!provider.client_message().contains("turn.example.net"));

        let malformed = RelayError::Malformed("expected value at line 1 column 1".to_string());
        assert_eq!(malformed.client_message(), "Malformed message");

        let full = RelayError::RoomFull(room());
        assert!(!full.client_message().contains("A1B2C3"));
    }

    #[test]
    fn test_to_notice() {
        let notice = RelayError::NotInRoom.to_notice();
        assert_eq!(notice.code, "NOT_IN_ROOM");
        assert_eq!(notice.message, "Join a room first");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RelayError::RoomFull(room())),
            "Room A1B2C3 is full"
        );
        assert_eq!(
            format!("{}", RelayError::from(ValidationError::InvalidRoomCode)),
            "Validation failed: Invalid room code"
        );
    }
}
