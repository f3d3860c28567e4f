use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that persists `confirmed → completed` for sessions whose
/// end has passed. The read-side projection already shows these as completed;
/// this makes the stored status catch up. Acts as the booking's own tutor.
pub async fn run_completer(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = engine.now_ms();
        for (booking_id, tutor_id) in engine.collect_elapsed_sessions(now) {
            match engine.complete_booking(booking_id, tutor_id).await {
                Ok(_) => info!("auto-completed elapsed session {booking_id}"),
                Err(e) => {
                    // May already have been completed or cancelled — that's fine
                    tracing::debug!("completer skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once the append count since the
/// last compaction crosses `threshold`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
