use assert_matches::assert_matches;
use chrono::{NaiveDate, Utc};

use doctor_cell::availability::{check_availability, free_slots, generate_slots, resolve_day, resolve_day_detailed, DaySource};
use doctor_cell::models::*;
use shared_models::RecordId;

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn day(start: &str, end: &str, duration: u32) -> DaySchedule {
    DaySchedule {
        active: true,
        day_start: t(start),
        day_end: t(end),
        intervals: generate_slots(t(start), t(end), duration).unwrap(),
    }
}

fn doctor() -> Doctor {
    let mut weekly_template = WeeklyTemplate::new();
    weekly_template.insert(DayOfWeek::Monday, day("09:00", "10:00", 30));
    weekly_template.insert(DayOfWeek::Thursday, day("08:00", "12:00", 30));
    weekly_template.insert(
        DayOfWeek::Friday,
        DaySchedule {
            active: false,
            ..day("09:00", "17:00", 30)
        },
    );

    Doctor {
        id: RecordId::generate(),
        first_name: "Ana".to_string(),
        last_name: "Ortiz".to_string(),
        specialty_id: None,
        appointment_duration: 30,
        is_active: true,
        weekly_template,
        date_exceptions: Vec::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[test]
fn monday_morning_is_cut_into_two_half_hours() {
    let slots = generate_slots(t("09:00"), t("10:00"), 30).unwrap();
    assert_eq!(
        slots,
        vec![Interval::new(t("09:00"), t("09:30")), Interval::new(t("09:30"), t("10:00"))]
    );
}

#[test]
fn slots_are_contiguous_and_stay_within_the_day() {
    for (start, end, duration) in [("08:00", "17:00", 45), ("09:10", "11:05", 25), ("13:00", "13:50", 50), ("00:00", "23:59", 7)] {
        let slots = generate_slots(t(start), t(end), duration).unwrap();
        assert_eq!(slots.first().map(|s| s.start), Some(t(start)));
        assert!(slots.last().unwrap().end <= t(end));
        for pair in slots.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(slots.iter().all(|s| !s.occupied && s.end.minutes() - s.start.minutes() == duration));
    }
}

#[test]
fn minute_overflow_carries_into_the_hour() {
    let slots = generate_slots(t("09:45"), t("11:00"), 25).unwrap();
    assert_eq!(slots[0].end, t("10:10"));
    assert_eq!(slots[2].end, t("11:00"));
}

#[test]
fn slot_that_would_overrun_the_day_is_dropped() {
    let slots = generate_slots(t("09:00"), t("10:00"), 40).unwrap();
    assert_eq!(slots, vec![Interval::new(t("09:00"), t("09:40"))]);
}

#[test]
fn degenerate_inputs() {
    assert!(generate_slots(t("10:00"), t("10:00"), 30).unwrap().is_empty());
    assert!(generate_slots(t("11:00"), t("10:00"), 30).unwrap().is_empty());
    assert_matches!(generate_slots(t("09:00"), t("10:00"), 0), Err(DoctorError::Validation(_)));
    assert_matches!(generate_slots(t("00:00"), t("23:59"), u32::MAX), Err(DoctorError::Validation(_)));
    assert!(generate_slots(t("00:00"), t("23:59"), 1440).unwrap().is_empty());
}

#[test]
fn template_drives_days_without_exceptions() {
    let doctor = doctor();
    let monday = date("2025-01-06");

    assert_eq!(resolve_day(&doctor, monday).len(), 2);
    assert_eq!(resolve_day_detailed(&doctor, monday).source, DaySource::Template(DayOfWeek::Monday));
    assert_eq!(resolve_day_detailed(&doctor, date("2025-01-10")).source, DaySource::Off);
    assert!(resolve_day(&doctor, date("2025-01-07")).is_empty());
}

#[test]
fn exception_replaces_the_template_verbatim() {
    let mut doctor = doctor();
    let monday = date("2025-01-06");
    let custom = vec![Interval::new(t("14:00"), t("14:20"))];
    doctor.date_exceptions.push(DateException::new(monday, custom.clone()));

    assert_eq!(resolve_day(&doctor, monday), custom);
    assert_eq!(resolve_day_detailed(&doctor, monday).source, DaySource::Exception(0));
    // Next Monday still follows the template.
    assert_eq!(resolve_day(&doctor, date("2025-01-13")).len(), 2);
}

#[test]
fn christmas_day_off_overrides_an_active_thursday() {
    let mut doctor = doctor();
    let christmas = date("2025-12-25");
    assert!(check_availability(&doctor, christmas, t("08:00")).available);

    doctor.date_exceptions.push(DateException::new(christmas, vec![]));

    let check = check_availability(&doctor, christmas, t("08:00"));
    assert_eq!(check, AvailabilityCheck::unavailable(UnavailableReason::DoctorInactive));
    assert!(resolve_day(&doctor, christmas).is_empty());
}

#[test]
fn reasons_are_reported_precisely() {
    let mut doctor = doctor();
    let monday = date("2025-01-06");

    assert_eq!(check_availability(&doctor, monday, t("09:00")), AvailabilityCheck::available());
    assert_eq!(
        check_availability(&doctor, monday, t("09:15")).reason,
        Some(UnavailableReason::OutsideWorkingHours)
    );
    assert_eq!(
        check_availability(&doctor, monday, t("10:00")).reason,
        Some(UnavailableReason::OutsideWorkingHours)
    );
    assert_eq!(
        check_availability(&doctor, date("2025-01-10"), t("09:00")).reason,
        Some(UnavailableReason::DoctorInactive)
    );

    let mut booked = resolve_day(&doctor, monday);
    booked[0].occupied = true;
    doctor.date_exceptions.push(DateException::new(monday, booked));
    assert_eq!(
        check_availability(&doctor, monday, t("09:00")).reason,
        Some(UnavailableReason::AlreadyBooked)
    );
    assert!(check_availability(&doctor, monday, t("09:30")).available);

    doctor.is_active = false;
    assert_eq!(
        check_availability(&doctor, monday, t("09:30")).reason,
        Some(UnavailableReason::DoctorInactive)
    );
}

#[test]
fn check_is_idempotent() {
    let doctor = doctor();
    let monday = date("2025-01-06");
    let first = check_availability(&doctor, monday, t("09:30"));
    for _ in 0..3 {
        assert_eq!(check_availability(&doctor, monday, t("09:30")), first);
    }
}

#[test]
fn free_slots_skip_booked_intervals() {
    let mut doctor = doctor();
    let monday = date("2025-01-06");
    let mut intervals = resolve_day(&doctor, monday);
    intervals[1].occupied = true;
    doctor.date_exceptions.push(DateException::new(monday, intervals));

    let free = free_slots(&doctor, monday);
    assert_eq!(free, vec![Interval::new(t("09:00"), t("09:30"))]);
}
