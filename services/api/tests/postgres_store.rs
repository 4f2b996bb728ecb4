//! Postgres repositories under concurrent writers
//!
//! These tests need PostgreSQL reachable through `DATABASE_URL`; run them
//! with `--ignored`.

use api::repositories::{ReservationRepository, SessionRepository};
use booking::{
    BookingError, Conflict, TimeOfDay, TimeWindow,
    models::{MaintenanceMark, NewReservation, SessionStatus},
    store::{ReservationStore, SessionStore},
};
use chrono::{NaiveDate, Utc};
use common::database::{DatabaseConfig, init_pool, run_migrations};
use sqlx::PgPool;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const LAB: i32 = 9001;

async fn pool() -> Result<PgPool, Box<dyn std::error::Error>> {
    let pool = init_pool(&DatabaseConfig::from_env()?).await?;
    run_migrations(&pool, &MIGRATOR).await?;
    sqlx::query(
        "INSERT INTO labs (id, name, pc_count) VALUES ($1, 'Integration', 40) \
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(LAB)
    .execute(&pool)
    .await?;
    Ok(pool)
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_session_starts_leave_one_active()
-> Result<(), Box<dyn std::error::Error>> {
    let pool = pool().await?;
    let repository = SessionRepository::new(pool);
    let device_number = 31;

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let repository = repository.clone();
            tokio::spawn(async move {
                repository
                    .start_session(&format!("rut-{i}"), LAB, device_number, Utc::now())
                    .await
            })
        })
        .collect();

    let mut started = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(session) => started.push(session),
            Err(BookingError::Conflict(Conflict::DeviceBusy { .. })) => {}
            Err(e) => panic!("session start failed: {e}"),
        }
    }
    assert!(!started.is_empty());

    let mut active = 0;
    for session in &started {
        let stored = repository
            .get_session(session.session_id)
            .await?
            .expect("session row");
        if stored.status == SessionStatus::Active {
            active += 1;
        }
    }
    assert_eq!(active, 1);
    Ok(())
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_marking_and_running_booking_exclude_each_other()
-> Result<(), Box<dyn std::error::Error>> {
    let pool = pool().await?;
    let repository = ReservationRepository::new(pool);
    let date = NaiveDate::from_ymd_opt(2031, 5, 6).expect("valid date");
    let window = TimeWindow::parse("08:10", "09:30")?;
    let now: TimeOfDay = "08:30".parse()?;

    for pc_id in 1..=10 {
        repository.clear_maintenance_mark(LAB, pc_id).await?;
        for existing in repository.find_for_pc(LAB, pc_id, date).await? {
            repository.cancel(existing.id, Utc::now()).await?;
        }

        let booking = {
            let repository = repository.clone();
            tokio::spawn(async move {
                repository
                    .insert(
                        NewReservation::individual("rut", LAB, pc_id, date, window),
                        Utc::now(),
                    )
                    .await
            })
        };
        let marking = {
            let repository = repository.clone();
            tokio::spawn(async move {
                repository
                    .set_maintenance_mark(
                        MaintenanceMark {
                            lab_id: LAB,
                            pc_id,
                            since: Utc::now(),
                        },
                        date,
                        now,
                    )
                    .await
            })
        };

        let booked = booking.await?.is_ok();
        let marked = marking.await?.is_ok();
        assert!(booked != marked, "pc {pc_id}: booked {booked}, marked {marked}");
    }
    Ok(())
}
