//! Kiosk usage sessions

use async_trait::async_trait;
use booking::{
    BookingError, BookingResult, Conflict,
    models::{SessionRecord, SessionStatus},
    store::SessionStore,
};
use chrono::{DateTime, Utc};
use common::error::is_constraint_violation;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{info, warn};
use uuid::Uuid;

use super::store_error;

const SESSION_COLUMNS: &str = "session_id, subject_id, lab_id, device_number, started_at, \
    ended_at, last_seen_at, end_reason, status";

/// Session repository for database operations
#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Create a new session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn start_session(
        &self,
        subject_id: &str,
        lab_id: i32,
        device_number: i32,
        at: DateTime<Utc>,
    ) -> BookingResult<SessionRecord> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to open transaction", e))?;

        // one starter per device at a time, so the second sees the first's row
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("session:{}:{}", lab_id, device_number))
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("Failed to lock device sessions", e))?;

        let superseded = sqlx::query(
            r#"
            UPDATE lab_sessions
            SET status = 'ended', ended_at = $3, end_reason = 'superseded'
            WHERE lab_id = $1 AND device_number = $2 AND status = 'active'
            "#,
        )
        .bind(lab_id)
        .bind(device_number)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to supersede device sessions", e))?;

        if superseded.rows_affected() > 0 {
            info!(
                "Superseded {} active session(s) on lab {} device {}",
                superseded.rows_affected(),
                lab_id,
                device_number
            );
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO lab_sessions
                (session_id, subject_id, lab_id, device_number, started_at, last_seen_at, status)
            VALUES ($1, $2, $3, $4, $5, $5, 'active')
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(subject_id)
        .bind(lab_id)
        .bind(device_number)
        .bind(at)
        .fetch_one(&mut *tx)
        .await;

        let row = match row {
            Ok(row) => row,
            Err(e) if is_constraint_violation(&e) => {
                warn!(
                    "Concurrent session start on lab {} device {}: {}",
                    lab_id, device_number, e
                );
                return Err(BookingError::Conflict(Conflict::DeviceBusy {
                    lab_id,
                    device_number,
                }));
            }
            Err(e) => return Err(store_error("Failed to start session", e)),
        };

        let session = session_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit session start", e))?;
        Ok(session)
    }

    async fn end_session(
        &self,
        session_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE lab_sessions
            SET status = 'ended',
                ended_at = COALESCE(ended_at, $3),
                end_reason = COALESCE(end_reason, $2)
            WHERE session_id = $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(reason)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to end session", e))?;

        row.map(|row| session_from_row(&row)).transpose()
    }

    async fn get_session(&self, session_id: Uuid) -> BookingResult<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM lab_sessions WHERE session_id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to get session", e))?;

        row.map(|row| session_from_row(&row)).transpose()
    }

    async fn heartbeat(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> BookingResult<Option<SessionRecord>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE lab_sessions
            SET last_seen_at = CASE WHEN status = 'active' THEN $2 ELSE last_seen_at END
            WHERE session_id = $1
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to record heartbeat", e))?;

        row.map(|row| session_from_row(&row)).transpose()
    }

    async fn sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<SessionRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM lab_sessions
            WHERE started_at >= $1 AND started_at < $2
              AND ($3::int IS NULL OR lab_id = $3)
            ORDER BY started_at
            "#,
            SESSION_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .bind(lab_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("Failed to list sessions", e))?;

        rows.iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: &PgRow) -> BookingResult<SessionRecord> {
    let status: String = row.get("status");

    Ok(SessionRecord {
        session_id: row.get("session_id"),
        subject_id: row.get("subject_id"),
        device_number: row.get("device_number"),
        lab_id: row.get("lab_id"),
        started_at: row.get("started_at"),
        ended_at: row.get("ended_at"),
        last_seen_at: row.get("last_seen_at"),
        end_reason: row.get("end_reason"),
        status: SessionStatus::parse(&status)
            .ok_or_else(|| BookingError::Store(format!("unknown session status {}", status)))?,
    })
}
