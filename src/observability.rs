use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Booking engine ──────────────────────────────────────────────

/// Counter: booking requests. Labels: outcome (`created` or an error code).
pub const BOOKING_REQUESTS_TOTAL: &str = "skillswap_booking_requests_total";

/// Histogram: time spent inside `request_booking`, lock wait included, in seconds.
pub const BOOKING_REQUEST_DURATION_SECONDS: &str = "skillswap_booking_request_duration_seconds";

/// Counter: status transitions committed. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "skillswap_booking_transitions_total";

/// Counter: pending requests expired by the background sweep.
pub const BOOKINGS_EXPIRED_TOTAL: &str = "skillswap_bookings_expired_total";

/// Counter: lock acquisitions that hit the configured timeout. Labels: resource.
pub const LOCK_TIMEOUTS_TOTAL: &str = "skillswap_lock_timeouts_total";

// ── Queries ─────────────────────────────────────────────────────

/// Histogram: slot computation latency in seconds.
pub const SLOT_QUERY_DURATION_SECONDS: &str = "skillswap_slot_query_duration_seconds";

// ── Ledger ──────────────────────────────────────────────────────

/// Counter: ledger entries appended. Labels: kind.
pub const LEDGER_ENTRIES_TOTAL: &str = "skillswap_ledger_entries_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "skillswap_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "skillswap_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Label for a booking request outcome.
pub fn outcome_label(result: &Result<crate::model::Booking, EngineError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(e) => e.code(),
    }
}

pub fn ledger_kind_label(kind: crate::model::LedgerKind) -> &'static str {
    use crate::model::LedgerKind;
    match kind {
        LedgerKind::SignupReward => "signup_reward",
        LedgerKind::ProfileReward => "profile_reward",
        LedgerKind::ExchangeRequest => "exchange_request",
        LedgerKind::ExchangeReject => "exchange_reject",
        LedgerKind::ExchangeExpire => "exchange_expire",
        LedgerKind::ExchangeCancel => "exchange_cancel",
        LedgerKind::ExchangeSettle => "exchange_settle",
    }
}
