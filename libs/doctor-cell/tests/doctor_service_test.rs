use std::collections::BTreeMap;
use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use doctor_cell::models::*;
use doctor_cell::DoctorService;
use shared_config::AppConfig;
use shared_database::{ConnectOptions, ConnectionRegistry, DatabaseLocator};
use tenant_cell::{NewTenant, TenantContext, TenantRegistry};

fn t(s: &str) -> TimeOfDay {
    s.parse().unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

async fn setup() -> (DoctorService, TenantContext, Doctor) {
    let connections = Arc::new(ConnectionRegistry::new(ConnectOptions::default()));
    let tenants = TenantRegistry::new(connections, DatabaseLocator::memory("platform"));
    tenants
        .create_tenant(NewTenant {
            name: "North Clinic".to_string(),
            slug: "north".to_string(),
            locator: DatabaseLocator::memory("clinic_north"),
            features: vec![],
        })
        .await
        .unwrap();
    let ctx = tenants.open("north").await.unwrap();

    let service = DoctorService::new(&AppConfig::default());
    let doctor = service
        .create_doctor(
            &ctx,
            CreateDoctorRequest {
                first_name: "Ana".to_string(),
                last_name: "Ortiz".to_string(),
                specialty_id: None,
                appointment_duration: None,
            },
        )
        .await
        .unwrap();

    let mut days = BTreeMap::new();
    days.insert(DayOfWeek::Monday, DayHours { active: true, day_start: t("09:00"), day_end: t("10:00") });
    days.insert(DayOfWeek::Thursday, DayHours { active: true, day_start: t("08:00"), day_end: t("09:00") });
    days.insert(DayOfWeek::Friday, DayHours { active: false, day_start: t("09:00"), day_end: t("10:00") });
    let doctor = service
        .save_weekly_availability(&ctx, doctor.id.as_str(), WeeklyAvailabilityRequest { duration_minutes: None, days })
        .await
        .unwrap();

    (service, ctx, doctor)
}

#[tokio::test]
async fn weekly_availability_generates_template_slots() {
    let (service, ctx, doctor) = setup().await;
    assert_eq!(doctor.appointment_duration, 30);

    let stored = service.get_doctor(&ctx, doctor.id.as_str()).await.unwrap();
    let monday = &stored.weekly_template[&DayOfWeek::Monday];
    assert_eq!(monday.intervals.len(), 2);
    assert!(stored.weekly_template[&DayOfWeek::Friday].intervals.is_empty());

    let slots = service
        .available_slots(&ctx, doctor.id.as_str(), date("2025-01-06"))
        .await
        .unwrap();
    assert_eq!(slots.iter().map(|s| s.start).collect::<Vec<_>>(), vec![t("09:00"), t("09:30")]);
}

#[tokio::test]
async fn invalid_weekly_hours_are_rejected() {
    let (service, ctx, doctor) = setup().await;
    let mut days = BTreeMap::new();
    days.insert(DayOfWeek::Tuesday, DayHours { active: true, day_start: t("12:00"), day_end: t("09:00") });

    assert_matches!(
        service
            .save_weekly_availability(&ctx, doctor.id.as_str(), WeeklyAvailabilityRequest { duration_minutes: None, days: days.clone() })
            .await,
        Err(DoctorError::Validation(_))
    );
    assert_matches!(
        service
            .save_weekly_availability(&ctx, doctor.id.as_str(), WeeklyAvailabilityRequest { duration_minutes: Some(0), days })
            .await,
        Err(DoctorError::Validation(_))
    );
}

#[tokio::test]
async fn durations_outside_one_day_are_rejected() {
    let (service, ctx, doctor) = setup().await;
    let mut days = BTreeMap::new();
    days.insert(DayOfWeek::Monday, DayHours { active: true, day_start: t("09:00"), day_end: t("10:00") });

    for duration in [u32::MAX, u32::MAX - 29, MAX_APPOINTMENT_DURATION + 1] {
        assert_matches!(
            service
                .save_weekly_availability(
                    &ctx,
                    doctor.id.as_str(),
                    WeeklyAvailabilityRequest { duration_minutes: Some(duration), days: days.clone() },
                )
                .await,
            Err(DoctorError::Validation(_))
        );
    }
    assert_matches!(
        service
            .create_doctor(
                &ctx,
                CreateDoctorRequest {
                    first_name: "Bo".to_string(),
                    last_name: "Lind".to_string(),
                    specialty_id: None,
                    appointment_duration: Some(u32::MAX),
                },
            )
            .await,
        Err(DoctorError::Validation(_))
    );

    // The stored template is untouched by the rejected saves.
    let stored = service.get_doctor(&ctx, doctor.id.as_str()).await.unwrap();
    assert_eq!(stored.appointment_duration, 30);
    assert_eq!(stored.weekly_template[&DayOfWeek::Monday].intervals.len(), 2);

    let whole_day = service
        .save_weekly_availability(
            &ctx,
            doctor.id.as_str(),
            WeeklyAvailabilityRequest { duration_minutes: Some(MAX_APPOINTMENT_DURATION), days },
        )
        .await
        .unwrap();
    assert!(whole_day.weekly_template[&DayOfWeek::Monday].intervals.is_empty());
}

#[tokio::test]
async fn released_pins_follow_a_new_template() {
    let (service, ctx, doctor) = setup().await;
    let id = doctor.id.as_str();
    let monday = date("2025-01-06");
    let next_monday = date("2025-01-13");
    let christmas = date("2025-12-25");

    service.occupy_interval(&ctx, id, monday, t("09:00")).await.unwrap();
    service.occupy_interval(&ctx, id, next_monday, t("09:00")).await.unwrap();
    assert!(service.release_interval(&ctx, id, monday, t("09:00")).await.unwrap());
    service
        .upsert_date_exception(&ctx, id, christmas, DateExceptionRequest::default())
        .await
        .unwrap();
    assert!(service.get_doctor(&ctx, id).await.unwrap().exception(monday).unwrap().pinned);

    let mut days = BTreeMap::new();
    days.insert(DayOfWeek::Monday, DayHours { active: true, day_start: t("14:00"), day_end: t("15:00") });
    let saved = service
        .save_weekly_availability(&ctx, id, WeeklyAvailabilityRequest { duration_minutes: None, days })
        .await
        .unwrap();

    assert!(saved.exception(monday).is_none());
    assert!(saved.exception(next_monday).is_some());
    assert!(!saved.exception(christmas).unwrap().pinned);

    let starts = |slots: Vec<Interval>| slots.iter().map(|s| s.start).collect::<Vec<_>>();
    assert_eq!(
        starts(service.available_slots(&ctx, id, monday).await.unwrap()),
        vec![t("14:00"), t("14:30")]
    );
    // Still booked, so it keeps the hours it was booked under.
    assert_eq!(starts(service.available_slots(&ctx, id, next_monday).await.unwrap()), vec![t("09:30")]);
}

#[tokio::test]
async fn unknown_doctor_is_not_found() {
    let (service, ctx, _) = setup().await;
    assert_matches!(
        service.get_doctor(&ctx, "0123456789abcdef01234567").await,
        Err(DoctorError::NotFound(_))
    );
    assert_matches!(service.get_doctor(&ctx, "not-an-id").await, Err(DoctorError::NotFound(_)));
}

#[tokio::test]
async fn occupying_a_template_day_pins_it_and_leaves_the_template_alone() {
    let (service, ctx, doctor) = setup().await;
    let id = doctor.id.as_str();
    let monday = date("2025-01-06");

    service.occupy_interval(&ctx, id, monday, t("09:00")).await.unwrap();

    let stored = service.get_doctor(&ctx, id).await.unwrap();
    let pinned = stored.exception(monday).unwrap();
    assert!(pinned.intervals[0].occupied);
    assert!(!pinned.intervals[1].occupied);
    assert!(stored.weekly_template[&DayOfWeek::Monday].intervals.iter().all(|i| !i.occupied));

    // The following Monday is unaffected.
    let next = service
        .check_availability(&ctx, id, date("2025-01-13"), t("09:00"))
        .await
        .unwrap();
    assert!(next.available);

    assert_matches!(
        service.occupy_interval(&ctx, id, monday, t("09:00")).await,
        Err(DoctorError::Unavailable(UnavailableReason::AlreadyBooked))
    );
    assert_matches!(
        service.occupy_interval(&ctx, id, monday, t("09:15")).await,
        Err(DoctorError::Unavailable(UnavailableReason::OutsideWorkingHours))
    );
    assert_matches!(
        service.occupy_interval(&ctx, id, date("2025-01-10"), t("09:00")).await,
        Err(DoctorError::Unavailable(UnavailableReason::DoctorInactive))
    );
}

#[tokio::test]
async fn release_frees_the_interval_once() {
    let (service, ctx, doctor) = setup().await;
    let id = doctor.id.as_str();
    let monday = date("2025-01-06");

    service.occupy_interval(&ctx, id, monday, t("09:30")).await.unwrap();
    assert!(service.release_interval(&ctx, id, monday, t("09:30")).await.unwrap());
    assert!(!service.release_interval(&ctx, id, monday, t("09:30")).await.unwrap());

    let check = service.check_availability(&ctx, id, monday, t("09:30")).await.unwrap();
    assert!(check.available);

    assert!(service.reoccupy_interval(&ctx, id, monday, t("09:30")).await.unwrap());
    assert_matches!(
        service.release_interval(&ctx, id, monday, t("11:00")).await,
        Err(DoctorError::IntervalNotFound { .. })
    );
}

#[tokio::test]
async fn day_off_exception_blocks_an_active_weekday() {
    let (service, ctx, doctor) = setup().await;
    let id = doctor.id.as_str();
    let christmas = date("2025-12-25");

    service
        .upsert_date_exception(&ctx, id, christmas, DateExceptionRequest::default())
        .await
        .unwrap();

    let check = service.check_availability(&ctx, id, christmas, t("08:00")).await.unwrap();
    assert_eq!(check.reason, Some(UnavailableReason::DoctorInactive));

    service.remove_date_exception(&ctx, id, christmas).await.unwrap();
    let check = service.check_availability(&ctx, id, christmas, t("08:00")).await.unwrap();
    assert!(check.available);
}

#[tokio::test]
async fn exceptions_keep_booked_intervals() {
    let (service, ctx, doctor) = setup().await;
    let id = doctor.id.as_str();
    let monday = date("2025-01-06");
    service.occupy_interval(&ctx, id, monday, t("09:00")).await.unwrap();

    // Extending the day keeps the 09:00 booking.
    let extended = service
        .upsert_date_exception(
            &ctx,
            id,
            monday,
            DateExceptionRequest {
                ranges: vec![TimeRange { start: t("09:00"), end: t("11:00") }],
                intervals: vec![],
            },
        )
        .await
        .unwrap();
    let day = extended.exception(monday).unwrap();
    assert_eq!(day.intervals.len(), 4);
    assert!(day.intervals[0].occupied);

    // Dropping it is refused, and so is removing the exception.
    let shrink = DateExceptionRequest {
        ranges: vec![TimeRange { start: t("10:00"), end: t("11:00") }],
        intervals: vec![],
    };
    assert_matches!(
        service.upsert_date_exception(&ctx, id, monday, shrink).await,
        Err(DoctorError::Conflict(_))
    );
    assert_matches!(
        service.remove_date_exception(&ctx, id, monday).await,
        Err(DoctorError::Conflict(_))
    );
}

#[tokio::test]
async fn explicit_exception_intervals_must_not_overlap() {
    let (service, ctx, doctor) = setup().await;
    let request = DateExceptionRequest {
        ranges: vec![],
        intervals: vec![
            Interval::new(t("09:00"), t("09:45")),
            Interval::new(t("09:30"), t("10:00")),
        ],
    };
    assert_matches!(
        service
            .upsert_date_exception(&ctx, doctor.id.as_str(), date("2025-01-07"), request)
            .await,
        Err(DoctorError::Validation(_))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_occupy_has_a_single_winner() {
    let (service, ctx, doctor) = setup().await;
    let service = Arc::new(service);
    let monday = date("2025-01-06");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let ctx = ctx.clone();
            let id = doctor.id.to_string();
            tokio::spawn(async move { service.occupy_interval(&ctx, &id, monday, t("09:00")).await })
        })
        .collect();

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => wins += 1,
            Err(err) => assert_matches!(err, DoctorError::Unavailable(UnavailableReason::AlreadyBooked)),
        }
    }
    assert_eq!(wins, 1);
}
