use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Allocation flow ─────────────────────────────────────────────

/// Counter: bookings admitted.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "slotbook_bookings_admitted_total";

/// Counter: booking requests turned away. Labels: reason (conflict, validation).
pub const BOOKINGS_REJECTED_TOTAL: &str = "slotbook_bookings_rejected_total";

/// Counter: bids placed or updated.
pub const BIDS_SUBMITTED_TOTAL: &str = "slotbook_bids_submitted_total";

/// Counter: competitor bids raised by auto-bid.
pub const AUTO_BIDS_TOTAL: &str = "slotbook_auto_bids_total";

/// Counter: bids left out of an auction round. Labels: reason.
pub const BIDS_EXCLUDED_TOTAL: &str = "slotbook_bids_excluded_total";

/// Counter: auctions closed. Labels: outcome (completed, cancelled).
pub const AUCTIONS_ENDED_TOTAL: &str = "slotbook_auctions_ended_total";

// ── Resources ───────────────────────────────────────────────────

/// Gauge: registered assets.
pub const ASSETS_ACTIVE: &str = "slotbook_assets_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "slotbook_wal_compactions_total";

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
