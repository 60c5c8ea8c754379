//! Availability engine: pure functions over a loaded [`Doctor`].
//!
//! A date exception, when one exists for the calendar day, replaces the weekly
//! template for that day entirely, even when it has no intervals.

use chrono::{Datelike, NaiveDate};

use crate::models::{
    validate_duration, AvailabilityCheck, DayOfWeek, DoctorError, Doctor, Interval, TimeOfDay,
    UnavailableReason,
};

/// Where the intervals of a day come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySource {
    /// Index into `Doctor::date_exceptions`.
    Exception(usize),
    Template(DayOfWeek),
    /// No exception and no active template entry.
    Off,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedDay<'a> {
    pub source: DaySource,
    pub intervals: &'a [Interval],
}

/// Cuts `[day_start, day_end)` into consecutive slots of `duration_minutes`.
///
/// The last slot may end exactly at `day_end`; a slot that would run past it
/// is dropped.
pub fn generate_slots(
    day_start: TimeOfDay,
    day_end: TimeOfDay,
    duration_minutes: u32,
) -> Result<Vec<Interval>, DoctorError> {
    validate_duration(duration_minutes)?;

    let mut slots = Vec::new();
    let end = day_end.minutes();
    let mut cursor = day_start.minutes();

    while cursor < end {
        let slot_end = match cursor.checked_add(duration_minutes) {
            Some(slot_end) if slot_end <= end => slot_end,
            _ => break,
        };
        // Both bounds are below day_end, so they are valid times of day.
        if let (Some(start), Some(finish)) = (TimeOfDay::from_minutes(cursor), TimeOfDay::from_minutes(slot_end)) {
            slots.push(Interval::new(start, finish));
        }
        cursor = slot_end;
    }

    Ok(slots)
}

/// Checks that intervals are well-formed and do not overlap; returns them sorted.
pub fn normalize_intervals(mut intervals: Vec<Interval>) -> Result<Vec<Interval>, DoctorError> {
    intervals.sort_by_key(|i| i.start);

    for interval in &intervals {
        if interval.start >= interval.end {
            return Err(DoctorError::Validation(format!(
                "Interval {}-{} must start before it ends",
                interval.start, interval.end
            )));
        }
    }
    for pair in intervals.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(DoctorError::Validation(format!(
                "Intervals {}-{} and {}-{} overlap",
                pair[0].start, pair[0].end, pair[1].start, pair[1].end
            )));
        }
    }

    Ok(intervals)
}

pub fn resolve_day_detailed(doctor: &Doctor, date: NaiveDate) -> ResolvedDay<'_> {
    if let Some(index) = doctor.exception_index(date) {
        return ResolvedDay {
            source: DaySource::Exception(index),
            intervals: &doctor.date_exceptions[index].intervals,
        };
    }

    let weekday = DayOfWeek::from(date.weekday());
    match doctor.weekly_template.get(&weekday) {
        Some(schedule) if schedule.active => ResolvedDay {
            source: DaySource::Template(weekday),
            intervals: &schedule.intervals,
        },
        _ => ResolvedDay {
            source: DaySource::Off,
            intervals: &[],
        },
    }
}

/// Ordered intervals the doctor works on `date`.
pub fn resolve_day(doctor: &Doctor, date: NaiveDate) -> Vec<Interval> {
    resolve_day_detailed(doctor, date).intervals.to_vec()
}

pub fn check_availability(doctor: &Doctor, date: NaiveDate, time: TimeOfDay) -> AvailabilityCheck {
    if !doctor.is_active {
        return AvailabilityCheck::unavailable(UnavailableReason::DoctorInactive);
    }

    let day = resolve_day_detailed(doctor, date);
    if day.intervals.is_empty() {
        return AvailabilityCheck::unavailable(UnavailableReason::DoctorInactive);
    }

    match day.intervals.iter().find(|interval| interval.start == time) {
        None => AvailabilityCheck::unavailable(UnavailableReason::OutsideWorkingHours),
        Some(interval) if interval.occupied => AvailabilityCheck::unavailable(UnavailableReason::AlreadyBooked),
        Some(_) => AvailabilityCheck::available(),
    }
}

/// Unoccupied intervals on `date`; empty when the doctor is inactive.
pub fn free_slots(doctor: &Doctor, date: NaiveDate) -> Vec<Interval> {
    if !doctor.is_active {
        return Vec::new();
    }
    resolve_day_detailed(doctor, date)
        .intervals
        .iter()
        .filter(|interval| !interval.occupied)
        .cloned()
        .collect()
}
