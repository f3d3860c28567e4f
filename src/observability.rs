use std::net::SocketAddr;

use crate::model::Event;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: events applied to the engine. Labels: event.
pub const EVENTS_APPLIED_TOTAL: &str = "tutorbook_events_applied_total";

/// Counter: booking requests rejected for a conflicting slot.
pub const BOOKINGS_REJECTED_TOTAL: &str = "tutorbook_bookings_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered tutors.
pub const TUTORS_ACTIVE: &str = "tutorbook_tutors_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutorbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutorbook_wal_flush_batch_size";

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

/// Install the fmt tracing subscriber. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

/// Map an event variant to a short label for metrics.
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::TutorRegistered { .. } => "tutor_registered",
        Event::AvailabilityReplaced { .. } => "availability_replaced",
        Event::BookingRequested { .. } => "booking_requested",
        Event::BookingConfirmed { .. } => "booking_confirmed",
        Event::BookingCancelled { .. } => "booking_cancelled",
        Event::BookingCompleted { .. } => "booking_completed",
    }
}
