//! Bitácora assembly
//!
//! Merges reservation records and kiosk session records into one attendance
//! ledger. Reservation rows are inserted first; a session row is kept only
//! when no reservation row shares its key, since sessions are a fallback
//! signal for usage nobody booked.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::{
    clock::{Clock, LabTimezone},
    error::{BookingError, BookingResult},
    models::{
        LedgerKey, LedgerRow, LedgerSource, LedgerStatus, Reservation, SessionRecord, SubjectKind,
    },
    store::{ReservationStore, SessionStore, UserDirectory},
    time_window::TimeOfDay,
};

/// Display length of a session that never recorded an end
pub const DEFAULT_SESSION_MINUTES: i64 = 40;

/// Longest range a single call may cover, in days
pub const MAX_RANGE_DAYS: i64 = 366;

/// Builds the attendance ledger for a date range
#[derive(Clone)]
pub struct BitacoraAssembler {
    reservations: Arc<dyn ReservationStore>,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    timezone: LabTimezone,
}

impl BitacoraAssembler {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        timezone: LabTimezone,
    ) -> Self {
        Self {
            reservations,
            sessions,
            users,
            clock,
            timezone,
        }
    }

    /// Assemble the ledger for `[from, to]`, optionally for one lab
    ///
    /// Output keeps the store's order for reservations (date, then start time)
    /// followed by the surviving session rows in start order. Callers needing
    /// a strict global chronology must re-sort.
    pub async fn assemble(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<LedgerRow>> {
        if from > to {
            return Err(BookingError::validation(format!(
                "range start {} is after range end {}",
                from, to
            )));
        }
        if (to - from).num_days() >= MAX_RANGE_DAYS {
            return Err(BookingError::validation(format!(
                "range may cover at most {} days",
                MAX_RANGE_DAYS
            )));
        }

        let reservations = self.reservations.list_in_range(from, to, lab_id).await?;
        let (utc_from, utc_to) = self.timezone.range_utc(from, to);
        let sessions = self
            .sessions
            .sessions_started_between(utc_from, utc_to, lab_id)
            .await?;

        let now = self.clock.now();
        let (today, now_time) = (self.timezone.date_of(now), self.timezone.time_of(now));
        let mut programs = ProgramCache::new(self.users.as_ref());

        let mut seen: HashSet<LedgerKey> = HashSet::new();
        let mut rows = Vec::with_capacity(reservations.len() + sessions.len());

        for reservation in reservations
            .iter()
            .filter(|r| r.subject_kind == SubjectKind::Individual)
        {
            let carrera = programs.program_of(&reservation.subject_id).await;
            let row = reservation_row(reservation, carrera, today, now_time);
            if seen.insert(row.key()) {
                rows.push(row);
            }
        }

        let reservation_rows = rows.len();
        for session in &sessions {
            let carrera = programs.program_of(&session.subject_id).await;
            let row = self.session_row(session, carrera);
            if seen.insert(row.key()) {
                rows.push(row);
            }
        }

        debug!(
            "Assembled bitácora {}..{} lab {:?}: {} reservation rows, {} of {} session rows",
            from,
            to,
            lab_id,
            reservation_rows,
            rows.len() - reservation_rows,
            sessions.len()
        );
        Ok(rows)
    }

    fn session_row(&self, session: &SessionRecord, carrera: Option<String>) -> LedgerRow {
        let start_date = self.timezone.date_of(session.started_at);
        let start = self.timezone.time_of(session.started_at);

        // display-only inference, the stored record is left untouched
        let ended_at = session
            .ended_at
            .unwrap_or(session.started_at + Duration::minutes(DEFAULT_SESSION_MINUTES));
        let end = if self.timezone.date_of(ended_at) > start_date {
            TimeOfDay::from_clock(23, 59)
        } else {
            self.timezone.time_of(ended_at)
        };

        LedgerRow {
            id: session.session_id,
            rut: session.subject_id.clone(),
            carrera,
            fecha_reserva: start_date,
            hora_inicio: start,
            hora_termino: end,
            lab_id: session.lab_id,
            pc_id: session.device_number,
            status: if session.is_active() {
                LedgerStatus::InProgress
            } else {
                LedgerStatus::Completed
            },
            tipo_actividad: None,
            source: LedgerSource::Session,
        }
    }
}

fn reservation_row(
    reservation: &Reservation,
    carrera: Option<String>,
    today: NaiveDate,
    now: TimeOfDay,
) -> LedgerRow {
    LedgerRow {
        id: reservation.id,
        rut: reservation.subject_id.clone(),
        carrera,
        fecha_reserva: reservation.date,
        hora_inicio: reservation.window.start(),
        hora_termino: reservation.window.end(),
        lab_id: reservation.lab_id,
        pc_id: reservation.pc_id,
        status: if reservation.has_ended_by(today, now) {
            LedgerStatus::Completed
        } else {
            LedgerStatus::Reserved
        },
        tipo_actividad: Some(
            reservation
                .activity
                .clone()
                .unwrap_or_else(|| reservation.subject_kind.as_str().to_string()),
        ),
        source: LedgerSource::Reservation,
    }
}

/// Per-call memo of directory lookups
struct ProgramCache<'a> {
    users: &'a dyn UserDirectory,
    known: HashMap<String, Option<String>>,
}

impl<'a> ProgramCache<'a> {
    fn new(users: &'a dyn UserDirectory) -> Self {
        Self {
            users,
            known: HashMap::new(),
        }
    }

    async fn program_of(&mut self, rut: &str) -> Option<String> {
        if let Some(program) = self.known.get(rut) {
            return program.clone();
        }

        let program = match self.users.lookup(rut).await {
            Ok(profile) => profile.and_then(|p| p.program),
            Err(e) => {
                warn!("User directory lookup for {} failed: {}", rut, e);
                None
            }
        };
        self.known.insert(rut.to_string(), program.clone());
        program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        memory::MemoryStore,
        models::{Lab, NewReservation, UserProfile},
        time_window::TimeWindow,
    };
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    async fn setup() -> (BitacoraAssembler, MemoryStore) {
        let store = MemoryStore::with_labs([Lab {
            id: 1,
            name: "Lab 1".to_string(),
            pc_count: 40,
            free_mode: false,
            standard_grid: false,
        }])
        .await;
        store
            .add_user(UserProfile {
                rut: "11.111.111-1".to_string(),
                full_name: "Ana Pérez".to_string(),
                program: Some("Ingeniería Informática".to_string()),
            })
            .await;

        let shared = Arc::new(store.clone());
        let assembler = BitacoraAssembler::new(
            shared.clone(),
            shared.clone(),
            shared,
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
            )),
            LabTimezone::utc(),
        );
        (assembler, store)
    }

    #[tokio::test]
    async fn test_open_session_is_displayed_for_default_duration() {
        let (assembler, store) = setup().await;
        let started = Utc.with_ymd_and_hms(2025, 3, 10, 10, 5, 0).unwrap();
        let session = store
            .start_session("11.111.111-1", 1, 12, started)
            .await
            .unwrap();

        let rows = assembler.assemble(date(), date(), Some(1)).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hora_inicio.to_string(), "10:05");
        assert_eq!(rows[0].hora_termino.to_string(), "10:45");
        assert_eq!(rows[0].status, LedgerStatus::InProgress);
        assert_eq!(rows[0].carrera.as_deref(), Some("Ingeniería Informática"));

        let stored = store.get_session(session.session_id).await.unwrap().unwrap();
        assert_eq!(stored.ended_at, None);
    }

    #[tokio::test]
    async fn test_class_blocks_are_not_attendance() {
        let (assembler, store) = setup().await;
        store
            .insert(
                NewReservation::individual(
                    "staff",
                    1,
                    4,
                    date(),
                    TimeWindow::parse("08:10", "09:30").unwrap(),
                )
                .with_kind(SubjectKind::ClassBlock),
                Utc::now(),
            )
            .await
            .unwrap();

        let rows = assembler.assemble(date(), date(), None).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_inverted_and_oversized_ranges() {
        let (assembler, _) = setup().await;
        let later = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();

        assert!(matches!(
            assembler.assemble(later, date(), None).await,
            Err(BookingError::Validation(_))
        ));

        let far = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
        assert!(matches!(
            assembler.assemble(date(), far, None).await,
            Err(BookingError::Validation(_))
        ));
    }
}
