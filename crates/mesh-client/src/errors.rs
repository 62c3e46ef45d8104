//! Mesh client error types.
//!
//! Errors from one peer link never cross into another link or into the
//! orchestrator's reconciliation loop; they are reported as
//! [`crate::orchestrator::MeshEvent::PeerFailed`] and the link is rebuilt.

use signaling_protocol::CodecError;
use thiserror::Error;

/// Failures reported by the external media stack.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// Creating a local offer or answer failed.
    #[error("Local description failed: {0}")]
    LocalDescription(String),

    /// Applying a remote description failed.
    #[error("Remote description rejected: {0}")]
    RemoteDescription(String),

    /// Applying a transport candidate failed.
    #[error("Candidate rejected: {0}")]
    Candidate(String),

    /// Transport-level failure (restart, track replacement).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection object could not be created.
    #[error("Connection setup failed: {0}")]
    Setup(String),
}

/// Per-link negotiation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// A relayed `sdp` or `candidate` payload had the wrong shape.
    #[error("Malformed negotiation payload: {0}")]
    MalformedPayload(String),

    /// The media stack refused an operation.
    #[error(transparent)]
    Media(#[from] MediaError),

    /// The transport stayed unusable past the restart deadline.
    #[error("Transport did not recover before the restart deadline")]
    RestartTimedOut,

    /// Our offer went unanswered past the same deadline.
    #[error("Offer was not answered before the deadline")]
    AnswerTimedOut,

    /// The transport closed without a local teardown.
    #[error("Transport closed unexpectedly")]
    TransportClosed,
}

impl From<CodecError> for NegotiationError {
    fn from(e: CodecError) -> Self {
        NegotiationError::MalformedPayload(e.to_string())
    }
}

/// Mesh client error type.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The relay connection could not be opened or was lost.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// ICE server lookup failed.
    #[error("ICE server lookup failed: {0}")]
    IceServers(String),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Internal error (actor channel closed).
    #[error("Internal error: {0}")]
    Internal(String),
}
