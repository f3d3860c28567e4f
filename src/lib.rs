//! Booking core for a tutoring marketplace: recurring weekly availability,
//! conflict-checked session requests, a four-state booking lifecycle with
//! actor authorization, and role-scoped read projections — persisted in an
//! append-only event log with group commit and compaction.

pub mod clock;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod service;
pub mod wal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BookingPolicy, Engine, EngineError};
pub use model::{
    Booking, BookingBuckets, BookingStatus, Event, Role, Span, TimeOfDay, TimeSlot, TutorState,
    WeekSchedule, Weekday,
};
pub use service::{BookingService, Config};
