//! Metrics definitions for the relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Credential provider is an external HTTPS call
        .set_buckets_for_metric(
            Matcher::Prefix("relay_ice_provider".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set ICE provider buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of connected sessions.
///
/// Metric: `relay_sessions_active`
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_sessions_active").set(count as f64);
}

/// Set the number of live rooms.
///
/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Record one event queued for a recipient.
///
/// Metric: `relay_messages_forwarded_total`
/// Labels: `event` (bounded by the relay event vocabulary)
pub fn record_message_forwarded(event: &'static str) {
    counter!("relay_messages_forwarded_total", "event" => event).increment(1);
}

/// Record an event that was not delivered.
///
/// Metric: `relay_messages_dropped_total`
/// Labels: `reason` (`unknown_target`, `recipient_gone`, `slow_consumer`, `malformed`,
/// `not_in_room`, `empty`)
pub fn record_message_dropped(reason: &'static str) {
    counter!("relay_messages_dropped_total", "reason" => reason).increment(1);
}

/// Record a rejected join.
///
/// Metric: `relay_joins_rejected_total`
/// Labels: `reason` (the error code of the rejection)
pub fn record_join_rejected(reason: &'static str) {
    counter!("relay_joins_rejected_total", "reason" => reason).increment(1);
}

/// Record a relay-credential provider call.
///
/// Metrics: `relay_ice_provider_requests_total`, `relay_ice_provider_latency_seconds`
/// Labels: `status` (`success`, `error`)
pub fn record_ice_provider_request(status: &'static str, duration: Duration) {
    counter!("relay_ice_provider_requests_total", "status" => status).increment(1);
    histogram!("relay_ice_provider_latency_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder these are no-ops; they must not panic.

    #[test]
    fn test_gauges() {
        set_sessions_active(0);
        set_sessions_active(10_000);
        set_rooms_active(0);
        set_rooms_active(50);
    }

    #[test]
    fn test_counters() {
        record_message_forwarded("offer");
        record_message_forwarded("participant-left");
        record_message_dropped("unknown_target");
        record_join_rejected("ROOM_FULL");
    }

    #[test]
    fn test_ice_provider_request() {
        record_ice_provider_request("success", Duration::from_millis(40));
        record_ice_provider_request("error", Duration::from_secs(10));
    }
}
