//! Mesh Client
//!
//! Client side of a full-mesh call: one negotiated media link per remote
//! participant, reconciled against the room membership the relay reports.
//!
//! # Architecture
//!
//! ```text
//! relay ◄──ws──► SignalingPump ──► MeshOrchestrator ──► LinkWorker (per peer)
//!                                    │  PeerLink (pure)      │
//!                                    ▼                       ▼
//!                               MeshEvent stream        MediaStack
//! ```
//!
//! - [`peer::link`] - negotiation state machine (pure, no I/O)
//! - [`peer::worker`] - ordered media-stack calls for one link
//! - [`orchestrator`] - membership reconciliation and effect execution
//! - [`signaling`] - relay WebSocket connection and ICE server lookup
//! - [`media`] - the media-stack seam, with a mock for tests

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod signaling;

pub use config::MeshConfig;
pub use errors::{MediaError, MeshError, NegotiationError};
pub use orchestrator::{MeshEvent, MeshHandle, MeshOrchestrator, MeshSnapshot};
pub use signaling::{fetch_ice_servers, MeshSession};
