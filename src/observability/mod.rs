//! Parse-rate counters, per-venue throughput, and circuit-breaker state for
//! downstream consumers (spec §2 Observability, SPEC_FULL §4.0d).
//!
//! Thin wrapper over the `metrics` facade so call sites read as plain
//! function calls instead of ad-hoc macro invocations scattered through the
//! pipeline; `install_recorder` wires the Prometheus exporter once at
//! startup, matching the `cooprefr-bettersys` ambient-stack precedent.

use crate::decode::Venue;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

pub fn install_recorder(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

fn venue_label(venue: Venue) -> &'static str {
    venue.as_str()
}

pub fn record_parse_success(venue: Venue) {
    counter!("launchstream_parse_success_total", "venue" => venue_label(venue)).increment(1);
}

pub fn record_parse_failure(venue: Venue) {
    counter!("launchstream_parse_failure_total", "venue" => venue_label(venue)).increment(1);
}

pub fn record_tokens_persisted() {
    counter!("launchstream_tokens_persisted_total").increment(1);
}

pub fn record_stale_quote_skip() {
    counter!("launchstream_stale_quote_skips_total").increment(1);
}

pub fn record_stream_drop() {
    counter!("launchstream_stream_drops_total").increment(1);
}

pub fn record_stream_reconnect() {
    counter!("launchstream_stream_reconnects_total").increment(1);
}

/// A frame that failed to parse into any known update shape (missing
/// account/transaction info, undersized pubkey bytes). Distinct from
/// [`record_stream_drop`], which counts queue-overflow backpressure drops
/// of otherwise well-formed updates.
pub fn record_malformed_frame() {
    counter!("launchstream_malformed_frames_total").increment(1);
}

pub fn set_gap_recovery_queue_depth(depth: u64) {
    gauge!("launchstream_gap_recovery_queue_depth").set(depth as f64);
}

pub fn set_write_failure_queue_occupancy(fraction: f64) {
    gauge!("launchstream_write_failure_queue_occupancy").set(fraction);
}

pub fn set_circuit_open(open: bool) {
    gauge!("launchstream_write_circuit_open").set(if open { 1.0 } else { 0.0 });
}

/// A venue-labeled parse-rate snapshot, suitable both for a metrics scrape
/// and for an optional periodic `tracing::info!` heartbeat log
/// (SPEC_FULL §10).
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseRateSnapshot {
    pub bc_success: u64,
    pub bc_failure: u64,
    pub amm_success: u64,
    pub amm_failure: u64,
}

impl ParseRateSnapshot {
    pub fn log_heartbeat(&self) {
        tracing::info!(
            bc_success = self.bc_success,
            bc_failure = self.bc_failure,
            amm_success = self.amm_success,
            amm_failure = self.amm_failure,
            "parse-rate heartbeat"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_label_matches_storage_encoding() {
        assert_eq!(venue_label(Venue::BondingCurve), "bonding_curve");
        assert_eq!(venue_label(Venue::AmmPool), "amm_pool");
    }
}
