use std::net::SocketAddr;

// ── Reservation operations ──────────────────────────────────────

/// Counter: engine operations. Labels: op (create, cancel, sweep), status (ok or error label).
pub const RESERVATION_OPS_TOTAL: &str = "deskbook_reservation_ops_total";

/// Histogram: create latency in seconds, lock wait and fsync included.
pub const CREATE_DURATION_SECONDS: &str = "deskbook_create_duration_seconds";

/// Counter: reservations moved to completed by the sweeper.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "deskbook_reservations_completed_total";

/// Gauge: registered workstations.
pub const RESOURCES_REGISTERED: &str = "deskbook_resources_registered";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "deskbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "deskbook_wal_flush_batch_size";

/// Counter: WAL appends retried after a failed flush.
pub const WAL_APPEND_RETRIES_TOTAL: &str = "deskbook_wal_append_retries_total";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "deskbook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
