//! Common data types for relay and client components.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of a room join code.
pub const ROOM_CODE_LEN: usize = 6;

/// Maximum identity length in bytes (RFC 5321 path limit).
pub const MAX_IDENTITY_LEN: usize = 254;

/// Relay-assigned identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ValidationError::InvalidSessionId)
    }
}

/// Six-character room join code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Validate and normalize a user-supplied room code.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidRoomCode` unless the trimmed input is
    /// exactly six ASCII letters or digits.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.len() != ROOM_CODE_LEN || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidRoomCode);
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The normalized code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

/// Display identity of a participant (an e-mail shaped string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Validate a user-supplied identity.
    ///
    /// The value must look like `local@domain.tld` with no whitespace and
    /// must not contain markup.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidIdentity` describing the first rule
    /// the input breaks.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidIdentity("empty"));
        }
        if trimmed.len() > MAX_IDENTITY_LEN {
            return Err(ValidationError::InvalidIdentity("too long"));
        }
        if trimmed.contains(['<', '>']) {
            return Err(ValidationError::InvalidIdentity("contains markup"));
        }
        if !is_email_shaped(trimmed) {
            return Err(ValidationError::InvalidIdentity("not an e-mail address"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// `local@domain.tld`: one `@`, no whitespace, a dot inside the domain.
fn is_email_shaped(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Camera and microphone flags a participant advertises to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Camera is sending
    pub camera: bool,
    /// Microphone is sending
    pub mic: bool,
}

impl Default for Presence {
    fn default() -> Self {
        Self {
            camera: true,
            mic: true,
        }
    }
}
