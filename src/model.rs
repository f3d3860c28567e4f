use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Unix milliseconds — the only absolute time type.
pub type Ms = i64;

/// Half-open overlap test shared by every interval comparison in the crate.
/// `[a0, a1)` and `[b0, b1)` overlap iff `a0 < b1 && b0 < a1`; boundary
/// equality is NOT an overlap, so back-to-back sessions are legal.
pub fn intervals_overlap<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        intervals_overlap(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Time of day as minutes since midnight, rendered as "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn new(hours: u16, minutes: u16) -> Self {
        debug_assert!(hours < 24 && minutes < 60, "time of day out of range");
        Self(hours * 60 + minutes)
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }

    /// Offset from midnight in milliseconds.
    pub fn as_ms(&self) -> Ms {
        self.0 as Ms * 60_000
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Error for a malformed "HH:MM" value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTimeOfDay(pub String);

impl fmt::Display for InvalidTimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {:?} (expected \"HH:MM\")", self.0)
    }
}

impl std::error::Error for InvalidTimeOfDay {}

impl FromStr for TimeOfDay {
    type Err = InvalidTimeOfDay;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s.split_once(':').ok_or_else(|| InvalidTimeOfDay(s.into()))?;
        let hours: u16 = h.parse().map_err(|_| InvalidTimeOfDay(s.into()))?;
        let minutes: u16 = m.parse().map_err(|_| InvalidTimeOfDay(s.into()))?;
        if h.len() != 2 || m.len() != 2 || hours >= 24 || minutes >= 60 {
            return Err(InvalidTimeOfDay(s.into()));
        }
        Ok(Self(hours * 60 + minutes))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Weekdays in schedule iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Weekday {
        Self::ALL[index % 7]
    }

    pub fn name(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One bookable window within a weekday's recurring hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeSlot {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        intervals_overlap(self.start, self.end, other.start, other.end)
    }
}

/// A tutor's recurring weekly hours: exactly seven weekday keys, each holding
/// an ordered, possibly-empty slot list. Serializes as a map that omits empty
/// days; replaced wholesale on update, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekSchedule {
    days: [Vec<TimeSlot>; 7],
}

impl WeekSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self, day: Weekday) -> &[TimeSlot] {
        &self.days[day.index()]
    }

    /// Appends without validating; validation is the explicit step before
    /// persistence.
    pub fn add_slot(&mut self, day: Weekday, slot: TimeSlot) {
        self.days[day.index()].push(slot);
    }

    /// Removes by position. An emptied day serializes as an absent key.
    pub fn remove_slot(&mut self, day: Weekday, index: usize) -> Option<TimeSlot> {
        let slots = &mut self.days[day.index()];
        if index < slots.len() {
            Some(slots.remove(index))
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(|slots| slots.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &[TimeSlot])> {
        Weekday::ALL.into_iter().map(|day| (day, self.slots(day)))
    }

    fn set_day(&mut self, day: Weekday, slots: Vec<TimeSlot>) {
        self.days[day.index()] = slots;
    }
}

impl Serialize for WeekSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let non_empty = self.days.iter().filter(|slots| !slots.is_empty()).count();
        let mut map = serializer.serialize_map(Some(non_empty))?;
        for (day, slots) in self.iter() {
            if !slots.is_empty() {
                map.serialize_entry(&day, slots)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for WeekSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WeekScheduleVisitor;

        impl<'de> Visitor<'de> for WeekScheduleVisitor {
            type Value = WeekSchedule;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of weekday to time slots")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut schedule = WeekSchedule::new();
                while let Some((day, slots)) = access.next_entry::<Weekday, Vec<TimeSlot>>()? {
                    schedule.set_day(day, slots);
                }
                Ok(schedule)
            }
        }

        deserializer.deserialize_map(WeekScheduleVisitor)
    }
}

/// Lifecycle of a session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Cancelled bookings release their slot; every other status holds it.
    pub fn blocks_slot(self) -> bool {
        self != BookingStatus::Cancelled
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        })
    }
}

/// The caller's side of the marketplace, for role-scoped projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
}

/// A concrete, dated student–tutor session request. Never physically deleted;
/// cancellation is a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub student_id: Ulid,
    pub tutor_id: Ulid,
    pub span: Span,
    pub subject: String,
    /// Fixed at creation; later tutor rate changes do not touch it.
    pub price_cents: u32,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub cancelled_by: Option<Ulid>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    /// Only the student and the tutor named on a booking may act on it.
    pub fn is_party(&self, actor: Ulid) -> bool {
        actor == self.student_id || actor == self.tutor_id
    }
}

/// Per-tutor aggregate: declared weekly hours plus every booking ever made
/// against this tutor, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct TutorState {
    pub id: Ulid,
    pub name: Option<String>,
    pub availability: WeekSchedule,
    pub bookings: Vec<Booking>,
}

impl TutorState {
    pub fn new(id: Ulid, name: Option<String>) -> Self {
        Self {
            id,
            name,
            availability: WeekSchedule::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
/// Transition events carry their wall-clock instant so `updated_at` replays
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    TutorRegistered {
        id: Ulid,
        name: Option<String>,
    },
    AvailabilityReplaced {
        tutor_id: Ulid,
        schedule: WeekSchedule,
        at: Ms,
    },
    BookingRequested {
        id: Ulid,
        tutor_id: Ulid,
        student_id: Ulid,
        span: Span,
        subject: String,
        price_cents: u32,
        notes: Option<String>,
        at: Ms,
    },
    BookingConfirmed {
        id: Ulid,
        tutor_id: Ulid,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        tutor_id: Ulid,
        by: Ulid,
        at: Ms,
    },
    BookingCompleted {
        id: Ulid,
        tutor_id: Ulid,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Role-scoped view buckets. `upcoming` is sorted ascending by start; the
/// other buckets keep the stable start-sorted storage order. These are
/// independent projections, not a partition — a tutor's future pending
/// booking appears under both `upcoming` and `pending`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingBuckets {
    pub upcoming: Vec<Booking>,
    pub pending: Vec<Booking>,
    pub completed: Vec<Booking>,
    pub cancelled: Vec<Booking>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub booking_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(start: &str, end: &str) -> TimeSlot {
        TimeSlot::new(start.parse().unwrap(), end.parse().unwrap())
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn time_of_day_parse_and_display() {
        let t: TimeOfDay = "09:30".parse().unwrap();
        assert_eq!(t.minutes(), 570);
        assert_eq!(t.to_string(), "09:30");
        assert_eq!(t.as_ms(), 570 * 60_000);
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        assert!("9:30".parse::<TimeOfDay>().is_err()); // must be zero-padded
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!("".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn time_of_day_ordering_matches_lexicographic() {
        let nine: TimeOfDay = "09:00".parse().unwrap();
        let nine_thirty: TimeOfDay = "09:30".parse().unwrap();
        let ten: TimeOfDay = "10:00".parse().unwrap();
        assert!(nine < nine_thirty);
        assert!(nine_thirty < ten);
    }

    #[test]
    fn slot_boundary_not_overlap() {
        let a = slot("09:00", "10:00");
        let b = slot("10:00", "11:00");
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&slot("09:30", "10:30")));
    }

    #[test]
    fn schedule_add_and_remove() {
        let mut schedule = WeekSchedule::new();
        schedule.add_slot(Weekday::Monday, slot("09:00", "10:00"));
        schedule.add_slot(Weekday::Monday, slot("14:00", "16:00"));
        assert_eq!(schedule.slots(Weekday::Monday).len(), 2);

        let removed = schedule.remove_slot(Weekday::Monday, 0).unwrap();
        assert_eq!(removed, slot("09:00", "10:00"));
        assert_eq!(schedule.slots(Weekday::Monday).len(), 1);

        assert!(schedule.remove_slot(Weekday::Monday, 5).is_none());
        assert!(schedule.remove_slot(Weekday::Tuesday, 0).is_none());
    }

    #[test]
    fn schedule_json_omits_empty_days() {
        let mut schedule = WeekSchedule::new();
        schedule.add_slot(Weekday::Monday, slot("09:00", "10:00"));
        schedule.add_slot(Weekday::Friday, slot("13:00", "15:00"));

        let json = serde_json::to_value(&schedule).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj.contains_key("monday"));
        assert!(obj.contains_key("friday"));
        assert_eq!(json["monday"][0]["start"], "09:00");

        // Removing the last slot drops the key entirely.
        schedule.remove_slot(Weekday::Friday, 0);
        let json = serde_json::to_value(&schedule).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
    }

    #[test]
    fn schedule_json_roundtrip() {
        let parsed: WeekSchedule = serde_json::from_str(
            r#"{"monday":[{"start":"09:00","end":"10:00"}],"sunday":[{"start":"20:00","end":"22:00"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.slots(Weekday::Monday), &[slot("09:00", "10:00")]);
        assert_eq!(parsed.slots(Weekday::Sunday), &[slot("20:00", "22:00")]);
        assert!(parsed.slots(Weekday::Tuesday).is_empty());

        let back: WeekSchedule =
            serde_json::from_str(&serde_json::to_string(&parsed).unwrap()).unwrap();
        assert_eq!(back, parsed);
    }

    #[test]
    fn weekday_index_roundtrip() {
        for (i, day) in Weekday::ALL.into_iter().enumerate() {
            assert_eq!(day.index(), i);
            assert_eq!(Weekday::from_index(i), day);
        }
        assert_eq!(Weekday::from_index(7), Weekday::Monday);
    }

    #[test]
    fn status_terminality() {
        assert!(!BookingStatus::Pending.is_terminal());
        assert!(!BookingStatus::Confirmed.is_terminal());
        assert!(BookingStatus::Completed.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());

        assert!(BookingStatus::Completed.blocks_slot());
        assert!(!BookingStatus::Cancelled.blocks_slot());
    }

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            student_id: Ulid::new(),
            tutor_id: Ulid::new(),
            span: Span::new(start, end),
            subject: "Mathematics".into(),
            price_cents: 4000,
            notes: None,
            status: BookingStatus::Pending,
            cancelled_by: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn booking_insert_keeps_order() {
        let mut ts = TutorState::new(Ulid::new(), None);
        ts.insert_booking(booking(300, 400));
        ts.insert_booking(booking(100, 200));
        ts.insert_booking(booking(200, 300));
        assert_eq!(ts.bookings[0].span.start, 100);
        assert_eq!(ts.bookings[1].span.start, 200);
        assert_eq!(ts.bookings[2].span.start, 300);
    }

    #[test]
    fn overlapping_skips_out_of_window() {
        let mut ts = TutorState::new(Ulid::new(), None);
        ts.insert_booking(booking(100, 200));
        ts.insert_booking(booking(450, 600));
        ts.insert_booking(booking(1000, 1100));

        let hits: Vec<_> = ts.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        // A booking ending exactly at query.start is NOT overlapping (half-open).
        let mut ts = TutorState::new(Ulid::new(), None);
        ts.insert_booking(booking(100, 200));
        let hits: Vec<_> = ts.overlapping(&Span::new(200, 300)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn is_party_checks_both_sides() {
        let b = booking(100, 200);
        assert!(b.is_party(b.student_id));
        assert!(b.is_party(b.tutor_id));
        assert!(!b.is_party(Ulid::new()));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let mut schedule = WeekSchedule::new();
        schedule.add_slot(Weekday::Wednesday, slot("09:00", "12:00"));
        let events = vec![
            Event::TutorRegistered {
                id: Ulid::new(),
                name: Some("Ada".into()),
            },
            Event::AvailabilityReplaced {
                tutor_id: Ulid::new(),
                schedule,
                at: 1_000,
            },
            Event::BookingRequested {
                id: Ulid::new(),
                tutor_id: Ulid::new(),
                student_id: Ulid::new(),
                span: Span::new(1_000, 2_000),
                subject: "Physics".into(),
                price_cents: 2_500,
                notes: Some("bring notes".into()),
                at: 500,
            },
            Event::BookingCancelled {
                id: Ulid::new(),
                tutor_id: Ulid::new(),
                by: Ulid::new(),
                at: 700,
            },
        ];
        for event in events {
            let bytes = bincode::serialize(&event).unwrap();
            let decoded: Event = bincode::deserialize(&bytes).unwrap();
            assert_eq!(event, decoded);
        }
    }
}
