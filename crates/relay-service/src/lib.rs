//! Signaling relay service library.
//!
//! A WebSocket relay that groups sessions into rooms and forwards
//! negotiation and room events between them:
//!
//! - Room membership with a fixed per-room capacity
//! - Targeted forwarding of offers, answers and transport candidates
//! - Room-wide chat, reactions, hand-raise and presence fan-out
//! - STUN/TURN endpoint lookup for browsers
//!
//! # Architecture
//!
//! ```text
//! axum Router
//! ├── /ws ─────────────► SessionActor (one per WebSocket)
//! │                        └── SignalingRelay (shared)
//! │                              ├── RoomRegistry (room -> members)
//! │                              └── outbox directory (session -> sender)
//! ├── /api/ice-servers ► IceServerSource (provider or static list)
//! └── /health, /ready
//! ```
//!
//! Membership changes commit in the registry before notifications are
//! queued, and each session's outbox has a single writer, so events from
//! one sender to one target arrive in the order they were sent.
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes
//! - [`registry`] - Room membership
//! - [`relay`] - Event routing
//! - [`session`] - Per-connection task
//! - [`ice`] - STUN/TURN endpoint sources
//! - [`routes`] - HTTP routes
//! - [`observability`] - Metrics and probes

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
pub mod ice;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod session;
