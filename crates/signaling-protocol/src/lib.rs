//! Signaling wire protocol.
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": "<name>", "data": <payload>}`. Event names are kebab-case
//! and payload fields are camelCase.
//!
//! - [`events`] - the client and relay event vocabulary
//! - [`negotiation`] - typed session descriptions and transport candidates
//! - [`codec`] - frame encoding and size-bounded decoding
//! - [`ice`] - STUN/TURN endpoint lists

#![warn(clippy::pedantic)]

pub mod codec;
pub mod events;
pub mod ice;
pub mod negotiation;

pub use codec::CodecError;
pub use events::{ClientEvent, ServerEvent};
pub use ice::{IceServer, IceServersResponse};
