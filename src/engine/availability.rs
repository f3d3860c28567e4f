use crate::limits::MAX_SLOTS_PER_DAY;
use crate::model::*;

use super::EngineError;

const DAY_MS: Ms = 86_400_000;
/// 1970-01-01 was a Thursday; shift so day index 0 lands on Monday.
const EPOCH_WEEKDAY_OFFSET: i64 = 3;

// ── Schedule validation ──────────────────────────────────────────

/// All-or-nothing validation of a weekly schedule. Weekdays are checked in
/// monday..sunday order; within a day every slot must satisfy `start < end`,
/// then the sorted slot list must be free of overlaps. Back-to-back slots
/// are legal.
pub fn validate_schedule(schedule: &WeekSchedule) -> Result<(), EngineError> {
    for day in Weekday::ALL {
        let slots = schedule.slots(day);
        if slots.len() > MAX_SLOTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many slots in one day"));
        }
        for slot in slots {
            if slot.start >= slot.end {
                return Err(EngineError::InvalidSlotOrder { day });
            }
        }
        if slots.len() > 1 {
            let mut sorted = slots.to_vec();
            sorted.sort_by_key(|s| s.start);
            for pair in sorted.windows(2) {
                if pair[0].overlaps(&pair[1]) {
                    return Err(EngineError::OverlappingSlots { day });
                }
            }
        }
    }
    Ok(())
}

// ── Weekly expansion ─────────────────────────────────────────────

pub(crate) fn weekday_of_day_index(days_since_epoch: i64) -> Weekday {
    Weekday::from_index((days_since_epoch + EPOCH_WEEKDAY_OFFSET).rem_euclid(7) as usize)
}

/// Project recurring weekly slots onto the concrete UTC days covered by
/// `query`, clamped to the window and merged into disjoint spans.
pub fn expand_week(schedule: &WeekSchedule, query: &Span) -> Vec<Span> {
    let mut out = Vec::new();
    let first_day = query.start.div_euclid(DAY_MS);
    let last_day = (query.end - 1).div_euclid(DAY_MS);
    for day_index in first_day..=last_day {
        let slots = schedule.slots(weekday_of_day_index(day_index));
        let midnight = day_index * DAY_MS;
        for slot in slots {
            let start = midnight + slot.start.as_ms();
            let end = midnight + slot.end.as_ms();
            if intervals_overlap(start, end, query.start, query.end) {
                out.push(Span::new(start.max(query.start), end.min(query.end)));
            }
        }
    }
    out.sort_by_key(|s| s.start);
    merge_overlapping(&out)
}

// ── Interval algebra ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Subtract `to_remove` (sorted by start) from `base` (sorted, disjoint).
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
