//! Observability module for the relay.
//!
//! # Privacy by Default
//!
//! Chat text, session descriptions and transport candidates are never
//! logged or used as labels. Metric labels are bounded:
//! - `event`: the fixed relay event vocabulary (~13 values)
//! - `reason`: fixed drop/rejection reasons
//! - `status`: `success` or `error`
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_sessions_active` | Gauge | none | Connected WebSocket sessions |
//! | `relay_rooms_active` | Gauge | none | Rooms with at least one member |
//! | `relay_messages_forwarded_total` | Counter | `event` | Events queued to a recipient |
//! | `relay_messages_dropped_total` | Counter | `reason` | Events not delivered |
//! | `relay_joins_rejected_total` | Counter | `reason` | Rejected join attempts |
//! | `relay_ice_provider_requests_total` | Counter | `status` | Credential provider calls |
//! | `relay_ice_provider_latency_seconds` | Histogram | none | Credential provider latency |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_ice_provider_request, record_join_rejected,
    record_message_dropped, record_message_forwarded, set_rooms_active, set_sessions_active,
};
