use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "toolshed_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "toolshed_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "toolshed_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "toolshed_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "toolshed_connections_rejected_total";

/// Gauge: number of loaded communities (tenant engines).
pub const TENANTS_ACTIVE: &str = "toolshed_tenants_active";

/// Counter: logins refused before the password check.
pub const AUTH_FAILURES_TOTAL: &str = "toolshed_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "toolshed_wal_flush_duration_seconds";

/// Histogram: events per WAL group commit.
pub const WAL_FLUSH_BATCH_SIZE: &str = "toolshed_wal_flush_batch_size";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "toolshed_reservations_created_total";

/// Counter: status transitions attempted. Labels: target, outcome.
pub const TRANSITIONS_TOTAL: &str = "toolshed_transitions_total";

/// Counter: requests refused because the dates overlap an accepted reservation.
pub const DATE_CONFLICTS_TOTAL: &str = "toolshed_date_conflicts_total";

/// Counter: status compare-and-set attempts that lost a race.
pub const CAS_RETRIES_TOTAL: &str = "toolshed_cas_retries_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used on the RED metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTool { .. } => "insert_tool",
        Command::DeleteTool { .. } => "delete_tool",
        Command::SelectTools => "select_tools",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateStatus { .. } => "update_status",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectToolReservations { .. } => "select_tool_reservations",
        Command::SelectRequests { .. } => "select_requests",
        Command::SelectPetitions { .. } => "select_petitions",
        Command::SelectPendingRatings { .. } => "select_pending_ratings",
        Command::InsertRating { .. } => "insert_rating",
        Command::SelectConflicts { .. } => "select_conflicts",
    }
}
