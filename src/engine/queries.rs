use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{expand_week, subtract_intervals};
use super::{Engine, EngineError};

impl Engine {
    /// Role- and time-scoped views over a user's bookings, recomputed from a
    /// fresh snapshot on every call. "Now" comes from the injected clock.
    ///
    /// - upcoming: pending or confirmed with a strictly future start, soonest
    ///   first (both roles).
    /// - pending: every pending booking regardless of time (tutor view only;
    ///   a student's pendings surface under upcoming).
    /// - completed: completed, plus — tutor view only — confirmed sessions
    ///   whose end has passed, shown as completed before the explicit
    ///   transition is ever persisted.
    /// - cancelled: cancelled.
    pub async fn list_bookings(&self, user_id: Ulid, role: Role) -> BookingBuckets {
        let bookings = match role {
            Role::Tutor => match self.get_tutor(&user_id) {
                Some(ts) => ts.read().await.bookings.clone(),
                None => Vec::new(),
            },
            Role::Student => self.student_booking_snapshot(&user_id).await,
        };

        let now = self.now_ms();
        let mut buckets = BookingBuckets::default();
        for b in bookings {
            match b.status {
                BookingStatus::Cancelled => buckets.cancelled.push(b),
                BookingStatus::Completed => buckets.completed.push(b),
                BookingStatus::Pending => {
                    if role == Role::Tutor {
                        buckets.pending.push(b.clone());
                    }
                    if b.span.start > now {
                        buckets.upcoming.push(b);
                    }
                }
                BookingStatus::Confirmed => {
                    if role == Role::Tutor && b.span.end <= now {
                        buckets.completed.push(b);
                    } else if b.span.start > now {
                        buckets.upcoming.push(b);
                    }
                }
            }
        }
        buckets.upcoming.sort_by_key(|b| b.span.start);
        buckets
    }

    /// Clone every booking the student is party to, reading each owning
    /// tutor's state under its own lock.
    async fn student_booking_snapshot(&self, student_id: &Ulid) -> Vec<Booking> {
        let ids = self
            .student_bookings
            .get(student_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tutor_id) = self.tutor_for_booking(&id)
                && let Some(ts) = self.get_tutor(&tutor_id) {
                    let guard = ts.read().await;
                    if let Some(b) = guard.booking(&id) {
                        out.push(b.clone());
                    }
                }
        }
        out
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Option<Booking> {
        let tutor_id = self.tutor_for_booking(&booking_id)?;
        let ts = self.get_tutor(&tutor_id)?;
        let guard = ts.read().await;
        guard.booking(&booking_id).cloned()
    }

    pub async fn get_availability(&self, tutor_id: Ulid) -> Option<WeekSchedule> {
        let ts = self.get_tutor(&tutor_id)?;
        let guard = ts.read().await;
        Some(guard.availability.clone())
    }

    pub fn list_tutors(&self) -> Vec<TutorInfo> {
        self.state
            .iter()
            .map(|entry| {
                let ts = entry.value().clone();
                let guard = ts.try_read().expect("list_tutors: uncontended read");
                TutorInfo {
                    id: guard.id,
                    name: guard.name.clone(),
                    booking_count: guard.bookings.len(),
                }
            })
            .collect()
    }

    /// Bookable windows for a tutor over `[query_start, query_end)`: the
    /// declared weekly hours expanded onto concrete days, minus the spans of
    /// non-cancelled bookings.
    pub async fn free_windows(
        &self,
        tutor_id: Ulid,
        query_start: Ms,
        query_end: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        if query_end <= query_start {
            return Err(EngineError::LimitExceeded("query window is empty"));
        }
        if query_end - query_start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let ts = match self.get_tutor(&tutor_id) {
            Some(ts) => ts,
            None => return Ok(vec![]),
        };
        let guard = ts.read().await;

        let query = Span::new(query_start, query_end);
        let windows = expand_week(&guard.availability, &query);
        if windows.is_empty() {
            return Ok(windows);
        }

        let mut taken: Vec<Span> = guard
            .overlapping(&query)
            .filter(|b| b.status.blocks_slot())
            .map(|b| b.span)
            .collect();
        taken.sort_by_key(|s| s.start);

        Ok(subtract_intervals(&windows, &taken))
    }
}
