mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{expand_week, merge_overlapping, subtract_intervals, validate_schedule};
pub use conflict::has_conflict;
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedTutorState = Arc<RwLock<TutorState>>;

/// Whether booking creation also checks the candidate against the tutor's
/// declared weekly hours. The observed marketplace behavior leaves this off:
/// tutors may accept out-of-schedule requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingPolicy {
    pub enforce_availability: bool,
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedTutorState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → tutor id.
    pub(super) booking_to_tutor: DashMap<Ulid, Ulid>,
    /// Student → booking ids, for the student-facing projections.
    pub(super) student_bookings: DashMap<Ulid, Vec<Ulid>>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) policy: BookingPolicy,
}

/// Apply an event directly to a TutorState (no locking — caller holds the lock).
fn apply_to_tutor(
    ts: &mut TutorState,
    event: &Event,
    booking_index: &DashMap<Ulid, Ulid>,
    student_index: &DashMap<Ulid, Vec<Ulid>>,
) {
    match event {
        Event::AvailabilityReplaced { schedule, .. } => {
            ts.availability = schedule.clone();
        }
        Event::BookingRequested {
            id,
            tutor_id,
            student_id,
            span,
            subject,
            price_cents,
            notes,
            at,
        } => {
            ts.insert_booking(Booking {
                id: *id,
                student_id: *student_id,
                tutor_id: *tutor_id,
                span: *span,
                subject: subject.clone(),
                price_cents: *price_cents,
                notes: notes.clone(),
                status: BookingStatus::Pending,
                cancelled_by: None,
                created_at: *at,
                updated_at: *at,
            });
            booking_index.insert(*id, *tutor_id);
            student_index.entry(*student_id).or_default().push(*id);
        }
        Event::BookingConfirmed { id, at, .. } => {
            if let Some(b) = ts.booking_mut(id) {
                b.status = BookingStatus::Confirmed;
                b.updated_at = *at;
            }
        }
        Event::BookingCancelled { id, by, at, .. } => {
            if let Some(b) = ts.booking_mut(id) {
                b.status = BookingStatus::Cancelled;
                b.cancelled_by = Some(*by);
                b.updated_at = *at;
            }
        }
        Event::BookingCompleted { id, at, .. } => {
            if let Some(b) = ts.booking_mut(id) {
                b.status = BookingStatus::Completed;
                b.updated_at = *at;
            }
        }
        // TutorRegistered is handled at the DashMap level, not here
        Event::TutorRegistered { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::with_options(
            wal_path,
            notify,
            Arc::new(SystemClock),
            BookingPolicy::default(),
        )
    }

    pub fn with_options(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_tutor: DashMap::new(),
            student_bookings: DashMap::new(),
            clock,
            policy,
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::TutorRegistered { id, name } => {
                    let ts = TutorState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(ts)));
                }
                other => {
                    if let Some(tutor_id) = event_tutor_id(other)
                        && let Some(entry) = engine.state.get(&tutor_id) {
                            let ts_arc = entry.clone();
                            let mut guard = ts_arc.try_write().expect("replay: uncontended write");
                            apply_to_tutor(
                                &mut guard,
                                other,
                                &engine.booking_to_tutor,
                                &engine.student_bookings,
                            );
                        }
                }
            }
        }

        Ok(engine)
    }

    pub fn now_ms(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_tutor(&self, id: &Ulid) -> Option<SharedTutorState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn tutor_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_tutor.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        tutor_id: Ulid,
        ts: &mut TutorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_tutor(ts, event, &self.booking_to_tutor, &self.student_bookings);
        metrics::counter!(
            crate::observability::EVENTS_APPLIED_TOTAL,
            "event" => crate::observability::event_label(event)
        )
        .increment(1);
        self.notify.send(tutor_id, event);
        Ok(())
    }

    /// Lookup booking → tutor, get tutor state, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<TutorState>), EngineError> {
        let tutor_id = self
            .tutor_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ts = self
            .get_tutor(&tutor_id)
            .ok_or(EngineError::NotFound(tutor_id))?;
        let guard = ts.write_owned().await;
        Ok((tutor_id, guard))
    }
}

/// Extract the tutor id from an event (for non-registration events).
fn event_tutor_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::AvailabilityReplaced { tutor_id, .. }
        | Event::BookingRequested { tutor_id, .. }
        | Event::BookingConfirmed { tutor_id, .. }
        | Event::BookingCancelled { tutor_id, .. }
        | Event::BookingCompleted { tutor_id, .. } => Some(*tutor_id),
        Event::TutorRegistered { .. } => None,
    }
}
