use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{expand_week, subtract_intervals, validate_schedule};
use super::conflict::{check_slot_available, validate_session_span};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn register_tutor(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.state.len() >= MAX_TUTORS {
            return Err(EngineError::LimitExceeded("too many tutors"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("tutor name too long"));
            }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::TutorRegistered { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(TutorState::new(id, name))));
        metrics::gauge!(crate::observability::TUTORS_ACTIVE).set(self.state.len() as f64);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Validate, then replace the tutor's weekly hours wholesale. Partial
    /// patches are never applied; a schedule that fails validation leaves the
    /// stored one untouched.
    pub async fn replace_availability(
        &self,
        tutor_id: Ulid,
        schedule: WeekSchedule,
    ) -> Result<WeekSchedule, EngineError> {
        validate_schedule(&schedule)?;
        let ts = self
            .get_tutor(&tutor_id)
            .ok_or(EngineError::NotFound(tutor_id))?;
        let mut guard = ts.write().await;

        let event = Event::AvailabilityReplaced {
            tutor_id,
            schedule,
            at: self.now_ms(),
        };
        self.persist_and_apply(tutor_id, &mut guard, &event).await?;
        Ok(guard.availability.clone())
    }

    /// Create a session request in `pending` state. The conflict check and
    /// the insert run under the same per-tutor write lock, so of two racing
    /// requests for overlapping slots exactly one succeeds and the other
    /// observes its booking.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        student_id: Ulid,
        tutor_id: Ulid,
        start_time: Ms,
        end_time: Ms,
        subject: String,
        price_cents: u32,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        let span = validate_session_span(start_time, end_time)?;
        if subject.is_empty() || subject.len() > MAX_SUBJECT_LEN {
            return Err(EngineError::LimitExceeded("subject length out of range"));
        }
        if let Some(ref n) = notes
            && n.len() > MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        let ts = self
            .get_tutor(&tutor_id)
            .ok_or(EngineError::NotFound(tutor_id))?;
        let mut guard = ts.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_TUTOR {
            return Err(EngineError::LimitExceeded("too many bookings for tutor"));
        }

        if let Err(e) = check_slot_available(&guard, &span) {
            metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL).increment(1);
            return Err(e);
        }
        if self.policy.enforce_availability {
            let windows = expand_week(&guard.availability, &span);
            let uncovered = subtract_intervals(&[span], &windows);
            if !uncovered.is_empty() {
                return Err(EngineError::OutsideAvailability {
                    requested: span,
                    uncovered,
                });
            }
        }

        let id = Ulid::new();
        let event = Event::BookingRequested {
            id,
            tutor_id,
            student_id,
            span,
            subject,
            price_cents,
            notes,
            at: self.now_ms(),
        };
        self.persist_and_apply(tutor_id, &mut guard, &event).await?;
        Ok(guard.booking(&id).cloned().expect("booking just applied"))
    }

    /// `pending → confirmed`, by the booking's own tutor.
    pub async fn confirm_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let (tutor_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if actor_id != booking.tutor_id {
            return Err(EngineError::Unauthorized {
                actor: actor_id,
                booking: booking_id,
            });
        }
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Confirmed,
            });
        }

        let event = Event::BookingConfirmed {
            id: booking_id,
            tutor_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(tutor_id, &mut guard, &event).await?;
        Ok(guard
            .booking(&booking_id)
            .cloned()
            .expect("booking present after apply"))
    }

    /// `pending | confirmed → cancelled`, by either party to the booking.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let (tutor_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.is_party(actor_id) {
            return Err(EngineError::Unauthorized {
                actor: actor_id,
                booking: booking_id,
            });
        }
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let event = Event::BookingCancelled {
            id: booking_id,
            tutor_id,
            by: actor_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(tutor_id, &mut guard, &event).await?;
        Ok(guard
            .booking(&booking_id)
            .cloned()
            .expect("booking present after apply"))
    }

    /// `confirmed → completed`, by the booking's own tutor (or the background
    /// completer acting as the tutor once the session's end has passed).
    pub async fn complete_booking(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
    ) -> Result<Booking, EngineError> {
        let (tutor_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if actor_id != booking.tutor_id {
            return Err(EngineError::Unauthorized {
                actor: actor_id,
                booking: booking_id,
            });
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Completed,
            });
        }

        let event = Event::BookingCompleted {
            id: booking_id,
            tutor_id,
            at: self.now_ms(),
        };
        self.persist_and_apply(tutor_id, &mut guard, &event).await?;
        Ok(guard
            .booking(&booking_id)
            .cloned()
            .expect("booking present after apply"))
    }

    /// Confirmed bookings whose end has passed, for the background completer.
    pub fn collect_elapsed_sessions(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let ts = entry.value().clone();
            if let Ok(guard) = ts.try_read() {
                for b in &guard.bookings {
                    if b.status == BookingStatus::Confirmed && b.span.end <= now {
                        elapsed.push((b.id, guard.id));
                    }
                }
            }
        }
        elapsed
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: each tutor's registration, their current
    /// schedule, and every booking's request plus its latest transition.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let tutor_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in tutor_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let ts = entry.value().clone();
            let guard = ts.try_read().expect("compact: uncontended read");

            events.push(Event::TutorRegistered {
                id: guard.id,
                name: guard.name.clone(),
            });
            if !guard.availability.is_empty() {
                events.push(Event::AvailabilityReplaced {
                    tutor_id: guard.id,
                    schedule: guard.availability.clone(),
                    at: self.now_ms(),
                });
            }

            for b in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: b.id,
                    tutor_id: b.tutor_id,
                    student_id: b.student_id,
                    span: b.span,
                    subject: b.subject.clone(),
                    price_cents: b.price_cents,
                    notes: b.notes.clone(),
                    at: b.created_at,
                });
                match b.status {
                    BookingStatus::Pending => {}
                    BookingStatus::Confirmed => events.push(Event::BookingConfirmed {
                        id: b.id,
                        tutor_id: b.tutor_id,
                        at: b.updated_at,
                    }),
                    BookingStatus::Completed => events.push(Event::BookingCompleted {
                        id: b.id,
                        tutor_id: b.tutor_id,
                        at: b.updated_at,
                    }),
                    BookingStatus::Cancelled => events.push(Event::BookingCancelled {
                        id: b.id,
                        tutor_id: b.tutor_id,
                        by: b.cancelled_by.unwrap_or(b.tutor_id),
                        at: b.updated_at,
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
