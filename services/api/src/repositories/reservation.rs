//! Reservations, labs and maintenance marks

use async_trait::async_trait;
use booking::{
    BookingError, BookingResult, Conflict, TimeOfDay, TimeWindow,
    models::{
        Lab, MaintenanceMark, NewReservation, Reservation, ReservationStatus, SubjectKind,
    },
    store::ReservationStore,
};
use chrono::{DateTime, NaiveDate, Utc};
use common::error::is_constraint_violation;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{debug, warn};
use uuid::Uuid;

use super::store_error;

const RESERVATION_COLUMNS: &str = "id, lab_id, pc_id, date, start_minute, end_minute, \
    subject_id, subject_kind, title, block_id, activity, status, created_at, cancelled_at";

/// Reservation repository for database operations
#[derive(Clone)]
pub struct ReservationRepository {
    pool: PgPool,
}

impl ReservationRepository {
    /// Create a new reservation repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Serialise writers of one (lab, pc, date) for the rest of the transaction
    async fn lock_slot(
        tx: &mut Transaction<'_, Postgres>,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
    ) -> BookingResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("reservation:{}:{}:{}", lab_id, pc_id, date))
            .execute(&mut **tx)
            .await
            .map_err(|e| store_error("Failed to lock reservation slot", e))?;
        Ok(())
    }

    /// Orders individual bookings against maintenance marks of one PC across
    /// every date: bookings hold it shared, marking holds it exclusive
    async fn lock_pc(
        tx: &mut Transaction<'_, Postgres>,
        lab_id: i32,
        pc_id: i32,
        exclusive: bool,
    ) -> BookingResult<()> {
        let statement = if exclusive {
            "SELECT pg_advisory_xact_lock(hashtext($1))"
        } else {
            "SELECT pg_advisory_xact_lock_shared(hashtext($1))"
        };
        sqlx::query(statement)
            .bind(format!("maintenance:{}:{}", lab_id, pc_id))
            .execute(&mut **tx)
            .await
            .map_err(|e| store_error("Failed to lock pc", e))?;
        Ok(())
    }

    /// Refuse individual bookings on a PC under maintenance
    async fn check_maintenance(
        tx: &mut Transaction<'_, Postgres>,
        candidate: &NewReservation,
    ) -> BookingResult<()> {
        if candidate.subject_kind != SubjectKind::Individual {
            return Ok(());
        }
        Self::lock_pc(tx, candidate.lab_id, candidate.pc_id, false).await?;

        let marked =
            sqlx::query("SELECT 1 FROM maintenance_marks WHERE lab_id = $1 AND pc_id = $2")
                .bind(candidate.lab_id)
                .bind(candidate.pc_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| store_error("Failed to check maintenance mark", e))?;
        if marked.is_some() {
            return Err(BookingError::Conflict(Conflict::Maintenance {
                lab_id: candidate.lab_id,
                pc_id: candidate.pc_id,
            }));
        }
        Ok(())
    }

    /// First active reservation blocking `candidate`, ignoring `ignore`
    async fn first_blocker(
        tx: &mut Transaction<'_, Postgres>,
        candidate: &NewReservation,
        ignore: Option<Uuid>,
    ) -> BookingResult<Option<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE lab_id = $1 AND pc_id = $2 AND date = $3
              AND status = 'active'
              AND start_minute < $5 AND $4 < end_minute
              AND ($6::uuid IS NULL OR id <> $6)
            ORDER BY start_minute
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(candidate.lab_id)
        .bind(candidate.pc_id)
        .bind(candidate.date)
        .bind(i32::from(candidate.window.start().minutes()))
        .bind(i32::from(candidate.window.end().minutes()))
        .bind(ignore)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| store_error("Failed to check reservation overlap", e))?;

        for row in rows {
            let existing = reservation_from_row(&row)?;
            if existing.blocks(candidate.subject_kind, &candidate.window) {
                return Ok(Some(existing));
            }
        }
        Ok(None)
    }

    /// Turn an exclusion-constraint failure into a conflict naming the winner
    async fn conflict_after_race(
        &self,
        candidate: &NewReservation,
        ignore: Option<Uuid>,
    ) -> BookingError {
        let blocker = match self.pool.begin().await {
            Ok(mut tx) => Self::first_blocker(&mut tx, candidate, ignore).await,
            Err(e) => Err(store_error("Failed to open transaction", e)),
        };
        match blocker {
            Ok(Some(existing)) => BookingError::conflict_with(existing),
            Ok(None) => {
                BookingError::Store("slot constraint violated by a concurrent write".to_string())
            }
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ReservationStore for ReservationRepository {
    async fn lab(&self, lab_id: i32) -> BookingResult<Option<Lab>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, pc_count, free_mode, standard_grid
            FROM labs
            WHERE id = $1
            "#,
        )
        .bind(lab_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to get lab", e))?;

        Ok(row.map(|row| lab_from_row(&row)))
    }

    async fn labs(&self) -> BookingResult<Vec<Lab>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, pc_count, free_mode, standard_grid
            FROM labs
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list labs", e))?;

        Ok(rows.iter().map(lab_from_row).collect())
    }

    async fn set_free_mode(&self, lab_id: i32, free_mode: bool) -> BookingResult<Option<Lab>> {
        let row = sqlx::query(
            r#"
            UPDATE labs SET free_mode = $2
            WHERE id = $1
            RETURNING id, name, pc_count, free_mode, standard_grid
            "#,
        )
        .bind(lab_id)
        .bind(free_mode)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to set free mode", e))?;

        Ok(row.map(|row| lab_from_row(&row)))
    }

    async fn get(&self, id: Uuid) -> BookingResult<Option<Reservation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to get reservation", e))?;

        row.map(|row| reservation_from_row(&row)).transpose()
    }

    async fn find_for_pc(
        &self,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
    ) -> BookingResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE lab_id = $1 AND pc_id = $2 AND date = $3
            ORDER BY start_minute
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(lab_id)
        .bind(pc_id)
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to find reservations for pc", e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    async fn list_by_date(
        &self,
        date: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE date = $1 AND status = 'active'
              AND ($2::int IS NULL OR lab_id = $2)
            ORDER BY lab_id, pc_id, start_minute
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(date)
        .bind(lab_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list reservations by date", e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    async fn list_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE date BETWEEN $1 AND $2 AND status = 'active'
              AND ($3::int IS NULL OR lab_id = $3)
            ORDER BY date, start_minute
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .bind(lab_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list reservations in range", e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    async fn insert(
        &self,
        reservation: NewReservation,
        created_at: DateTime<Utc>,
    ) -> BookingResult<Reservation> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to open transaction", e))?;

        Self::lock_slot(&mut tx, reservation.lab_id, reservation.pc_id, reservation.date).await?;
        Self::check_maintenance(&mut tx, &reservation).await?;
        if let Some(existing) = Self::first_blocker(&mut tx, &reservation, None).await? {
            debug!(
                "Rejecting {} on lab {} pc {}: blocked by {}",
                reservation.window, reservation.lab_id, reservation.pc_id, existing.id
            );
            return Err(BookingError::conflict_with(existing));
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO reservations
                (id, lab_id, pc_id, date, start_minute, end_minute,
                 subject_id, subject_kind, title, block_id, activity, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'active', $12)
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(reservation.lab_id)
        .bind(reservation.pc_id)
        .bind(reservation.date)
        .bind(i32::from(reservation.window.start().minutes()))
        .bind(i32::from(reservation.window.end().minutes()))
        .bind(&reservation.subject_id)
        .bind(reservation.subject_kind.as_str())
        .bind(&reservation.title)
        .bind(reservation.block_id)
        .bind(&reservation.activity)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_constraint_violation(&e) => {
                warn!("Exclusion constraint caught a concurrent booking: {}", e);
                drop(tx);
                return Err(self.conflict_after_race(&reservation, None).await);
            }
            Err(e) => return Err(store_error("Failed to insert reservation", e)),
        };

        let stored = reservation_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit reservation", e))?;
        Ok(stored)
    }

    async fn reslot(&self, id: Uuid, window: TimeWindow) -> BookingResult<Reservation> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| BookingError::not_found("reservation", id))?;

        let candidate = NewReservation {
            lab_id: current.lab_id,
            pc_id: current.pc_id,
            date: current.date,
            window,
            subject_id: current.subject_id.clone(),
            subject_kind: current.subject_kind,
            title: current.title.clone(),
            block_id: current.block_id,
            activity: current.activity.clone(),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to open transaction", e))?;

        Self::lock_slot(&mut tx, current.lab_id, current.pc_id, current.date).await?;
        Self::check_maintenance(&mut tx, &candidate).await?;
        if let Some(existing) = Self::first_blocker(&mut tx, &candidate, Some(id)).await? {
            return Err(BookingError::conflict_with(existing));
        }

        let updated = sqlx::query(&format!(
            r#"
            UPDATE reservations
            SET start_minute = $2, end_minute = $3
            WHERE id = $1
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .bind(i32::from(window.start().minutes()))
        .bind(i32::from(window.end().minutes()))
        .fetch_one(&mut *tx)
        .await;

        let row = match updated {
            Ok(row) => row,
            Err(e) if is_constraint_violation(&e) => {
                drop(tx);
                return Err(self.conflict_after_race(&candidate, Some(id)).await);
            }
            Err(e) => return Err(store_error("Failed to re-slot reservation", e)),
        };

        let stored = reservation_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit re-slot", e))?;
        Ok(stored)
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> BookingResult<Option<Reservation>> {
        // COALESCE keeps the first cancellation time on repeated calls
        let row = sqlx::query(&format!(
            r#"
            UPDATE reservations
            SET status = 'cancelled', cancelled_at = COALESCE(cancelled_at, $2)
            WHERE id = $1
            RETURNING {}
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to cancel reservation", e))?;

        row.map(|row| reservation_from_row(&row)).transpose()
    }

    async fn block_members(&self, block_id: Uuid) -> BookingResult<Vec<Reservation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reservations WHERE block_id = $1 ORDER BY pc_id",
            RESERVATION_COLUMNS
        ))
        .bind(block_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list class block members", e))?;

        rows.iter().map(reservation_from_row).collect()
    }

    async fn maintenance_mark(
        &self,
        lab_id: i32,
        pc_id: i32,
    ) -> BookingResult<Option<MaintenanceMark>> {
        let row = sqlx::query(
            "SELECT lab_id, pc_id, since FROM maintenance_marks WHERE lab_id = $1 AND pc_id = $2",
        )
        .bind(lab_id)
        .bind(pc_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to get maintenance mark", e))?;

        Ok(row.map(|row| mark_from_row(&row)))
    }

    async fn maintenance_marks(&self, lab_id: i32) -> BookingResult<Vec<MaintenanceMark>> {
        let rows = sqlx::query(
            "SELECT lab_id, pc_id, since FROM maintenance_marks WHERE lab_id = $1 ORDER BY pc_id",
        )
        .bind(lab_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list maintenance marks", e))?;

        Ok(rows.iter().map(mark_from_row).collect())
    }

    async fn set_maintenance_mark(
        &self,
        mark: MaintenanceMark,
        date: NaiveDate,
        time: TimeOfDay,
    ) -> BookingResult<MaintenanceMark> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to open transaction", e))?;

        Self::lock_pc(&mut tx, mark.lab_id, mark.pc_id, true).await?;
        let running = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM reservations
            WHERE lab_id = $1 AND pc_id = $2 AND date = $3
              AND status = 'active' AND subject_kind = $4
              AND start_minute <= $5 AND $5 < end_minute
            ORDER BY start_minute
            LIMIT 1
            "#,
            RESERVATION_COLUMNS
        ))
        .bind(mark.lab_id)
        .bind(mark.pc_id)
        .bind(date)
        .bind(SubjectKind::Individual.as_str())
        .bind(i32::from(time.minutes()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to check running reservation", e))?;
        if let Some(row) = running {
            return Err(BookingError::conflict_with(reservation_from_row(&row)?));
        }

        // the no-op update makes RETURNING yield the existing row
        let row = sqlx::query(
            r#"
            INSERT INTO maintenance_marks (lab_id, pc_id, since)
            VALUES ($1, $2, $3)
            ON CONFLICT (lab_id, pc_id) DO UPDATE SET since = maintenance_marks.since
            RETURNING lab_id, pc_id, since
            "#,
        )
        .bind(mark.lab_id)
        .bind(mark.pc_id)
        .bind(mark.since)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to set maintenance mark", e))?;

        let stored = mark_from_row(&row);
        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit maintenance mark", e))?;
        Ok(stored)
    }

    async fn clear_maintenance_mark(&self, lab_id: i32, pc_id: i32) -> BookingResult<bool> {
        let result = sqlx::query("DELETE FROM maintenance_marks WHERE lab_id = $1 AND pc_id = $2")
            .bind(lab_id)
            .bind(pc_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("Failed to clear maintenance mark", e))?;

        Ok(result.rows_affected() > 0)
    }
}

fn lab_from_row(row: &PgRow) -> Lab {
    Lab {
        id: row.get("id"),
        name: row.get("name"),
        pc_count: row.get("pc_count"),
        free_mode: row.get("free_mode"),
        standard_grid: row.get("standard_grid"),
    }
}

fn mark_from_row(row: &PgRow) -> MaintenanceMark {
    MaintenanceMark {
        lab_id: row.get("lab_id"),
        pc_id: row.get("pc_id"),
        since: row.get("since"),
    }
}

fn time_from_column(row: &PgRow, column: &str) -> BookingResult<TimeOfDay> {
    let minutes: i32 = row.get(column);
    u16::try_from(minutes)
        .map_err(|_| BookingError::Store(format!("{} out of range: {}", column, minutes)))
        .and_then(TimeOfDay::from_minutes)
}

fn reservation_from_row(row: &PgRow) -> BookingResult<Reservation> {
    let kind: String = row.get("subject_kind");
    let status: String = row.get("status");

    Ok(Reservation {
        id: row.get("id"),
        lab_id: row.get("lab_id"),
        pc_id: row.get("pc_id"),
        date: row.get("date"),
        window: TimeWindow::new(
            time_from_column(row, "start_minute")?,
            time_from_column(row, "end_minute")?,
        )?,
        subject_id: row.get("subject_id"),
        subject_kind: SubjectKind::parse(&kind)
            .ok_or_else(|| BookingError::Store(format!("unknown subject kind {}", kind)))?,
        title: row.get("title"),
        block_id: row.get("block_id"),
        activity: row.get("activity"),
        status: ReservationStatus::parse(&status)
            .ok_or_else(|| BookingError::Store(format!("unknown reservation status {}", status)))?,
        created_at: row.get("created_at"),
        cancelled_at: row.get("cancelled_at"),
    })
}
