//! Common error types for relay and client components.

use thiserror::Error;

/// Rejection reasons for user-supplied values.
///
/// Raised before any state is touched, so a rejected value never
/// leaves partial effects behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Room code is not six ASCII letters or digits
    #[error("Invalid room code")]
    InvalidRoomCode,

    /// Identity is empty, too long, or not shaped like an e-mail address
    #[error("Invalid identity: {0}")]
    InvalidIdentity(&'static str),

    /// Session identifier is not a UUID
    #[error("Invalid session id")]
    InvalidSessionId,
}

/// Result type alias using `ValidationError`
pub type Result<T> = std::result::Result<T, ValidationError>;
