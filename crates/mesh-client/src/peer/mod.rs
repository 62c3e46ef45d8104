//! Per-peer negotiation.
//!
//! - [`link`] - the pure negotiation state machine, one per remote
//! - [`worker`] - serializes media-stack calls for one link and reports
//!   their outcomes back as [`LinkCompletion`]s

pub mod link;
pub mod worker;

pub use link::{LinkEffect, LinkEvent, LinkState, PeerLink, Role};
pub use worker::{LinkOp, LinkWorker, LinkWorkerHandle};

use common::types::SessionId;

/// A [`LinkEvent`] produced outside the orchestrator (media-stack call
/// result or connection notification), tagged with the link it belongs to.
///
/// The orchestrator drops completions whose `epoch` no longer matches the
/// live link for `remote`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCompletion {
    pub remote: SessionId,
    pub epoch: u64,
    pub event: LinkEvent,
}
