//! Allocation engine
//!
//! Decides availability and creates, edits and cancels reservations. The
//! engine is a stateless request handler: every write re-validates the slot
//! inside the store, so a check made earlier by the UI is never trusted.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clock::{Clock, LabTimezone},
    error::{BookingError, BookingResult},
    models::{
        Availability, Lab, MaintenanceMark, NewReservation, PcOccupancy, PcState, Reservation,
        SubjectKind,
    },
    store::ReservationStore,
    time_window::{TimeOfDay, TimeWindow},
};

/// How a class block reacts to PCs that could not be booked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassBlockMode {
    /// Keep what succeeded and report the failures
    #[default]
    BestEffort,
    /// Roll back every created row if any PC fails
    Atomic,
}

/// A PC of a class block that could not be booked
#[derive(Debug, Clone, Serialize)]
pub struct ClassBlockFailure {
    pub pc_id: i32,
    pub reason: String,
    pub conflicting_reservation: Option<Uuid>,
}

/// Result of fanning a class block out over a lab's PCs
#[derive(Debug, Clone, Serialize)]
pub struct ClassBlockOutcome {
    pub block_id: Uuid,
    pub created: Vec<Reservation>,
    pub failures: Vec<ClassBlockFailure>,
}

impl ClassBlockOutcome {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The reservation allocation engine
#[derive(Clone)]
pub struct AllocationEngine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    timezone: LabTimezone,
}

impl AllocationEngine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        timezone: LabTimezone,
    ) -> Self {
        Self {
            store,
            clock,
            timezone,
        }
    }

    pub fn timezone(&self) -> LabTimezone {
        self.timezone
    }

    /// Lab-local date and minute of the current instant
    pub fn local_now(&self) -> (NaiveDate, TimeOfDay) {
        let now = self.clock.now();
        (self.timezone.date_of(now), self.timezone.time_of(now))
    }

    pub async fn lab(&self, lab_id: i32) -> BookingResult<Lab> {
        self.store
            .lab(lab_id)
            .await?
            .ok_or_else(|| BookingError::not_found("lab", lab_id))
    }

    pub async fn labs(&self) -> BookingResult<Vec<Lab>> {
        self.store.labs().await
    }

    /// Validate a (lab, pc, window) triple against the lab definition
    async fn validate_slot(
        &self,
        lab_id: i32,
        pc_id: i32,
        window: &TimeWindow,
    ) -> BookingResult<Lab> {
        let lab = self.lab(lab_id).await?;
        if !lab.has_pc(pc_id) {
            return Err(BookingError::validation(format!(
                "lab {} has no PC {} (valid range 1-{})",
                lab_id, pc_id, lab.pc_count
            )));
        }
        if let Some(grid) = lab.grid() {
            grid.validate(window)?;
        }
        Ok(lab)
    }

    fn ensure_not_elapsed(&self, date: NaiveDate, window: &TimeWindow) -> BookingResult<()> {
        let (today, now) = self.local_now();
        if date < today || (date == today && window.end() <= now) {
            return Err(BookingError::validation(format!(
                "window {} on {} has already elapsed",
                window, date
            )));
        }
        Ok(())
    }

    /// Whether a PC can take an individual booking for a window
    ///
    /// Class blocks are informational overlays and never make a PC unavailable.
    pub async fn check_availability(
        &self,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
        window: TimeWindow,
    ) -> BookingResult<Availability> {
        self.validate_slot(lab_id, pc_id, &window).await?;

        if self.store.maintenance_mark(lab_id, pc_id).await?.is_some() {
            return Ok(Availability {
                available: false,
                conflicting_reservation: None,
                under_maintenance: true,
            });
        }

        let conflicting = self
            .store
            .find_for_pc(lab_id, pc_id, date)
            .await?
            .into_iter()
            .find(|r| r.blocks(SubjectKind::Individual, &window));

        Ok(match conflicting {
            Some(reservation) => Availability {
                available: false,
                under_maintenance: reservation.subject_kind == SubjectKind::Maintenance,
                conflicting_reservation: Some(reservation),
            },
            None => Availability::free(),
        })
    }

    /// Book a single PC
    ///
    /// Availability and maintenance are re-checked atomically by the store at
    /// write time.
    pub async fn create_reservation(&self, request: NewReservation) -> BookingResult<Reservation> {
        if request.subject_id.trim().is_empty() {
            return Err(BookingError::validation("subject id is required"));
        }
        self.validate_slot(request.lab_id, request.pc_id, &request.window)
            .await?;
        self.ensure_not_elapsed(request.date, &request.window)?;

        let created_at = self.clock.now();
        let reservation = self.store.insert(request, created_at).await.inspect_err(|e| {
            if let BookingError::Conflict(conflict) = e {
                info!("Reservation refused: {}", conflict);
            }
        })?;

        info!(
            "Created {} reservation {} for {} on lab {} pc {} {} {}",
            reservation.subject_kind.as_str(),
            reservation.id,
            reservation.subject_id,
            reservation.lab_id,
            reservation.pc_id,
            reservation.date,
            reservation.window
        );
        Ok(reservation)
    }

    /// Fan a class block out into one class-block reservation per PC
    ///
    /// Each PC is an independent write. In best-effort mode failures are
    /// reported per PC; in atomic mode any failure cancels what was created.
    pub async fn create_class_block(
        &self,
        lab_id: i32,
        date: NaiveDate,
        window: TimeWindow,
        title: &str,
        created_by: &str,
        mode: ClassBlockMode,
    ) -> BookingResult<ClassBlockOutcome> {
        if title.trim().is_empty() {
            return Err(BookingError::validation("class block title is required"));
        }
        let lab = self.validate_slot(lab_id, 1, &window).await?;
        self.ensure_not_elapsed(date, &window)?;

        let block_id = Uuid::new_v4();
        let mut outcome = ClassBlockOutcome {
            block_id,
            created: Vec::new(),
            failures: Vec::new(),
        };
        let mut first_error = None;

        for pc_id in lab.pcs() {
            let row = NewReservation {
                lab_id,
                pc_id,
                date,
                window,
                subject_id: created_by.to_string(),
                subject_kind: SubjectKind::ClassBlock,
                title: Some(title.to_string()),
                block_id: Some(block_id),
                activity: None,
            };
            match self.store.insert(row, self.clock.now()).await {
                Ok(reservation) => outcome.created.push(reservation),
                Err(e) => {
                    outcome.failures.push(ClassBlockFailure {
                        pc_id,
                        reason: e.to_string(),
                        conflicting_reservation: match &e {
                            BookingError::Conflict(conflict) => {
                                conflict.reservation().map(|r| r.id)
                            }
                            _ => None,
                        },
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(error) = first_error {
            warn!(
                "Class block {} on lab {} {} {}: {} of {} PCs failed",
                block_id,
                lab_id,
                date,
                window,
                outcome.failure_count(),
                lab.pc_count
            );
            if mode == ClassBlockMode::Atomic {
                self.rollback_partial_block(&outcome).await?;
                return Err(error);
            }
        } else {
            info!(
                "Created class block {} '{}' on lab {} {} {}",
                block_id, title, lab_id, date, window
            );
        }

        Ok(outcome)
    }

    /// Cancel the successfully created subset of a partial class block
    pub async fn rollback_partial_block(
        &self,
        outcome: &ClassBlockOutcome,
    ) -> BookingResult<usize> {
        let now = self.clock.now();
        let mut cancelled = 0;
        for reservation in &outcome.created {
            if self.store.cancel(reservation.id, now).await?.is_some() {
                cancelled += 1;
            }
        }
        info!(
            "Rolled back {} rows of class block {}",
            cancelled, outcome.block_id
        );
        Ok(cancelled)
    }

    /// Cancel every PC row of a class block
    pub async fn cancel_class_block(&self, block_id: Uuid) -> BookingResult<Vec<Reservation>> {
        let members = self.store.block_members(block_id).await?;
        if members.is_empty() {
            return Err(BookingError::not_found("class block", block_id));
        }

        let now = self.clock.now();
        let mut cancelled = Vec::with_capacity(members.len());
        for member in members {
            if let Some(reservation) = self.store.cancel(member.id, now).await? {
                cancelled.push(reservation);
            }
        }
        Ok(cancelled)
    }

    /// Move a reservation to a new window on the same PC and date
    pub async fn edit_reservation(
        &self,
        id: Uuid,
        window: TimeWindow,
    ) -> BookingResult<Reservation> {
        let current = self.get_reservation(id).await?;
        if !current.is_active() {
            return Err(BookingError::validation(format!(
                "reservation {} is cancelled and cannot be edited",
                id
            )));
        }
        self.validate_slot(current.lab_id, current.pc_id, &window)
            .await?;
        self.ensure_not_elapsed(current.date, &window)?;

        let updated = self.store.reslot(id, window).await?;
        info!(
            "Re-slotted reservation {} from {} to {}",
            id, current.window, updated.window
        );
        Ok(updated)
    }

    /// Cancel a reservation; cancelling twice is a no-op success
    pub async fn cancel_reservation(&self, id: Uuid) -> BookingResult<Reservation> {
        let reservation = self
            .store
            .cancel(id, self.clock.now())
            .await?
            .ok_or_else(|| BookingError::not_found("reservation", id))?;
        info!("Cancelled reservation {}", id);
        Ok(reservation)
    }

    pub async fn get_reservation(&self, id: Uuid) -> BookingResult<Reservation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BookingError::not_found("reservation", id))
    }

    /// Put a PC under maintenance or release it
    ///
    /// Entering maintenance is refused while an individual reservation is
    /// running on the PC right now; class blocks never prevent it.
    pub async fn set_maintenance(
        &self,
        lab_id: i32,
        pc_id: i32,
        on: bool,
    ) -> BookingResult<Option<MaintenanceMark>> {
        let lab = self.lab(lab_id).await?;
        if !lab.has_pc(pc_id) {
            return Err(BookingError::validation(format!(
                "lab {} has no PC {}",
                lab_id, pc_id
            )));
        }

        if !on {
            if self.store.clear_maintenance_mark(lab_id, pc_id).await? {
                info!("PC {} in lab {} left maintenance", pc_id, lab_id);
            }
            return Ok(None);
        }

        let (today, now) = self.local_now();
        let mark = self
            .store
            .set_maintenance_mark(
                MaintenanceMark {
                    lab_id,
                    pc_id,
                    since: self.clock.now(),
                },
                today,
                now,
            )
            .await?;
        info!("PC {} in lab {} entered maintenance", pc_id, lab_id);
        Ok(Some(mark))
    }

    /// Standing maintenance marks of a lab, ordered by PC
    pub async fn maintenance_marks(&self, lab_id: i32) -> BookingResult<Vec<MaintenanceMark>> {
        self.lab(lab_id).await?;
        self.store.maintenance_marks(lab_id).await
    }

    /// Per-PC occupancy of a lab for one window
    ///
    /// An individual reservation is what makes a PC occupied; a class block
    /// overlapping the window is reported alongside as an overlay.
    pub async fn pc_occupancy(
        &self,
        lab_id: i32,
        date: NaiveDate,
        window: TimeWindow,
    ) -> BookingResult<Vec<PcOccupancy>> {
        let lab = self.lab(lab_id).await?;
        let reservations = self.store.list_by_date(date, Some(lab_id)).await?;
        let marks = self.store.maintenance_marks(lab_id).await?;

        let occupancy = lab
            .pcs()
            .map(|pc_id| {
                let on_pc = || {
                    reservations
                        .iter()
                        .filter(move |r| r.pc_id == pc_id && r.window.overlaps(&window))
                };
                let class_block = on_pc()
                    .find(|r| r.subject_kind == SubjectKind::ClassBlock)
                    .map(|r| r.block_id.unwrap_or(r.id));

                let state = if marks.iter().any(|m| m.pc_id == pc_id)
                    || on_pc().any(|r| r.subject_kind == SubjectKind::Maintenance)
                {
                    PcState::Maintenance
                } else if let Some(r) = on_pc().find(|r| r.subject_kind == SubjectKind::Individual) {
                    PcState::Individual {
                        reservation_id: r.id,
                        subject_id: r.subject_id.clone(),
                    }
                } else {
                    PcState::Free
                };

                PcOccupancy {
                    pc_id,
                    state,
                    class_block,
                }
            })
            .collect();

        Ok(occupancy)
    }

    /// Whether a reservation holds its PC right now, derived from stored times
    pub fn is_active_now(&self, reservation: &Reservation) -> bool {
        let (today, now) = self.local_now();
        reservation.is_running_at(today, now)
    }

    /// Whether a reservation's window is over, derived from stored times
    pub fn has_expired(&self, reservation: &Reservation) -> bool {
        let (today, now) = self.local_now();
        reservation.has_ended_by(today, now)
    }

    pub async fn list_by_date(
        &self,
        date: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>> {
        self.store.list_by_date(date, lab_id).await
    }

    /// Active reservations of one PC on one date
    pub async fn list_by_pc(
        &self,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
    ) -> BookingResult<Vec<Reservation>> {
        Ok(self
            .store
            .find_for_pc(lab_id, pc_id, date)
            .await?
            .into_iter()
            .filter(Reservation::is_active)
            .collect())
    }

    pub async fn set_free_mode(&self, lab_id: i32, free_mode: bool) -> BookingResult<Lab> {
        let lab = self
            .store
            .set_free_mode(lab_id, free_mode)
            .await?
            .ok_or_else(|| BookingError::not_found("lab", lab_id))?;
        info!("Lab {} free mode set to {}", lab_id, free_mode);
        Ok(lab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::FixedClock, error::Conflict, memory::MemoryStore};
    use chrono::{TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow::parse(start, end).unwrap()
    }

    async fn engine_at(hour: u32, minute: u32) -> (AllocationEngine, MemoryStore, FixedClock) {
        let store = MemoryStore::with_labs([
            Lab {
                id: 1,
                name: "Lab 1".to_string(),
                pc_count: 40,
                free_mode: false,
                standard_grid: false,
            },
            Lab {
                id: 2,
                name: "Lab 2".to_string(),
                pc_count: 4,
                free_mode: false,
                standard_grid: true,
            },
        ])
        .await;
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap());
        let engine = AllocationEngine::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            LabTimezone::utc(),
        );
        (engine, store, clock)
    }

    #[tokio::test]
    async fn test_rejects_unknown_pc_and_lab() {
        let (engine, _, _) = engine_at(7, 0).await;

        let bad_pc = engine
            .check_availability(1, 41, date(), window("08:10", "09:30"))
            .await;
        assert!(matches!(bad_pc, Err(BookingError::Validation(_))));

        let bad_lab = engine
            .check_availability(9, 1, date(), window("08:10", "09:30"))
            .await;
        assert!(matches!(bad_lab, Err(BookingError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_grid_lab_rejects_off_grid_window() {
        let (engine, _, _) = engine_at(7, 0).await;

        let off_grid = engine
            .create_reservation(NewReservation::individual(
                "11.111.111-1",
                2,
                1,
                date(),
                window("09:00", "10:00"),
            ))
            .await;
        assert!(matches!(off_grid, Err(BookingError::Validation(_))));

        engine
            .create_reservation(NewReservation::individual(
                "11.111.111-1",
                2,
                1,
                date(),
                window("08:10", "09:30"),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_elapsed_windows() {
        let (engine, _, _) = engine_at(10, 0).await;

        let elapsed = engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                1,
                date(),
                window("08:10", "09:30"),
            ))
            .await;
        assert!(matches!(elapsed, Err(BookingError::Validation(_))));

        // still running counts as bookable
        engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                1,
                date(),
                window("09:30", "11:00"),
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_edit_excludes_own_prior_slot() {
        let (engine, _, _) = engine_at(7, 0).await;
        let booked = engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                3,
                date(),
                window("08:10", "09:30"),
            ))
            .await
            .unwrap();

        let moved = engine
            .edit_reservation(booked.id, window("08:50", "10:10"))
            .await
            .unwrap();
        assert_eq!(moved.id, booked.id);
        assert_eq!(moved.window, window("08:50", "10:10"));
    }

    #[tokio::test]
    async fn test_edit_into_someone_else_conflicts() {
        let (engine, _, _) = engine_at(7, 0).await;
        engine
            .create_reservation(NewReservation::individual(
                "a",
                1,
                3,
                date(),
                window("10:00", "11:00"),
            ))
            .await
            .unwrap();
        let mine = engine
            .create_reservation(NewReservation::individual(
                "b",
                1,
                3,
                date(),
                window("08:10", "09:30"),
            ))
            .await
            .unwrap();

        let result = engine
            .edit_reservation(mine.id, window("09:30", "10:30"))
            .await;
        assert!(matches!(result, Err(BookingError::Conflict(_))));

        let unchanged = engine.get_reservation(mine.id).await.unwrap();
        assert_eq!(unchanged.window, window("08:10", "09:30"));
    }

    #[tokio::test]
    async fn test_maintenance_refused_under_running_individual_booking() {
        let (engine, _, _) = engine_at(8, 30).await;
        engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                2,
                date(),
                window("08:10", "09:30"),
            ))
            .await
            .unwrap();

        let result = engine.set_maintenance(1, 2, true).await;
        assert!(matches!(result, Err(BookingError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_maintenance_allowed_under_class_block() {
        let (engine, _, _) = engine_at(8, 30).await;
        engine
            .create_class_block(
                1,
                date(),
                window("08:10", "09:30"),
                "Redes",
                "staff",
                ClassBlockMode::BestEffort,
            )
            .await
            .unwrap();

        let mark = engine.set_maintenance(1, 2, true).await.unwrap();
        assert!(mark.is_some());
    }

    #[tokio::test]
    async fn test_maintenance_and_running_booking_never_both_land() {
        let (engine, store, _) = engine_at(8, 30).await;

        for pc_id in 1..=20 {
            let booking = {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_reservation(NewReservation::individual(
                            "rut",
                            1,
                            pc_id,
                            date(),
                            window("08:10", "09:30"),
                        ))
                        .await
                })
            };
            let marking = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.set_maintenance(1, pc_id, true).await })
            };

            let booked = booking.await.unwrap().is_ok();
            let marked = marking.await.unwrap().is_ok();
            assert!(booked != marked, "pc {pc_id}: booked {booked}, marked {marked}");
            assert_eq!(
                store.maintenance_mark(1, pc_id).await.unwrap().is_some(),
                marked
            );
        }
    }

    #[tokio::test]
    async fn test_marked_pc_refuses_moving_an_individual_booking() {
        let (engine, _, _) = engine_at(7, 0).await;
        let booked = engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                6,
                date(),
                window("10:00", "11:00"),
            ))
            .await
            .unwrap();
        engine.set_maintenance(1, 6, true).await.unwrap();

        let moved = engine.edit_reservation(booked.id, window("11:00", "12:00")).await;
        assert!(matches!(
            moved,
            Err(BookingError::Conflict(Conflict::Maintenance { pc_id: 6, .. }))
        ));
    }

    #[tokio::test]
    async fn test_created_at_follows_the_engine_clock() {
        let (engine, _, clock) = engine_at(7, 0).await;
        let booked = engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                9,
                date(),
                window("10:00", "11:00"),
            ))
            .await
            .unwrap();

        assert_eq!(booked.created_at, clock.now());
    }

    #[tokio::test]
    async fn test_best_effort_class_block_reports_failures_and_rolls_back() {
        let (engine, _, _) = engine_at(7, 0).await;
        let first = engine
            .create_class_block(
                2,
                date(),
                window("08:10", "09:30"),
                "Redes",
                "staff",
                ClassBlockMode::BestEffort,
            )
            .await
            .unwrap();
        assert!(first.is_complete());
        engine.cancel_reservation(first.created[0].id).await.unwrap();

        let overlapping = engine
            .create_class_block(
                2,
                date(),
                window("08:50", "10:10"),
                "Bases de datos",
                "staff",
                ClassBlockMode::BestEffort,
            )
            .await
            .unwrap();
        assert_eq!(overlapping.created.len(), 1);
        assert_eq!(overlapping.failure_count(), 3);
        assert!(overlapping.failures[0].conflicting_reservation.is_some());

        let cancelled = engine.rollback_partial_block(&overlapping).await.unwrap();
        assert_eq!(cancelled, 1);
        let remaining = engine.list_by_pc(2, 1, date()).await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_atomic_class_block_leaves_nothing_behind() {
        let (engine, store, _) = engine_at(7, 0).await;
        store
            .insert(
                NewReservation::individual("staff", 2, 4, date(), window("08:10", "09:30"))
                    .with_kind(SubjectKind::ClassBlock),
                Utc::now(),
            )
            .await
            .unwrap();

        let result = engine
            .create_class_block(
                2,
                date(),
                window("08:10", "09:30"),
                "Redes",
                "staff",
                ClassBlockMode::Atomic,
            )
            .await;
        assert!(matches!(result, Err(BookingError::Conflict(_))));

        let active = engine.list_by_date(date(), Some(2)).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_occupancy_prefers_individual_over_class_overlay() {
        let (engine, _, _) = engine_at(7, 0).await;
        let block = engine
            .create_class_block(
                2,
                date(),
                window("08:10", "09:30"),
                "Redes",
                "staff",
                ClassBlockMode::BestEffort,
            )
            .await
            .unwrap();
        engine
            .create_reservation(NewReservation::individual(
                "student",
                2,
                1,
                date(),
                window("08:10", "09:30"),
            ))
            .await
            .unwrap();
        engine.set_maintenance(2, 3, true).await.unwrap();

        let map = engine
            .pc_occupancy(2, date(), window("08:10", "09:30"))
            .await
            .unwrap();

        assert!(matches!(map[0].state, PcState::Individual { .. }));
        assert_eq!(map[0].class_block, Some(block.block_id));
        assert!(matches!(map[1].state, PcState::Free));
        assert!(!map[1].is_occupied());
        assert!(matches!(map[2].state, PcState::Maintenance));
    }

    #[tokio::test]
    async fn test_expiry_is_derived_from_stored_times() {
        let (engine, _, clock) = engine_at(8, 0).await;
        let booked = engine
            .create_reservation(NewReservation::individual(
                "rut",
                1,
                1,
                date(),
                window("08:10", "09:30"),
            ))
            .await
            .unwrap();
        assert!(!engine.is_active_now(&booked));

        clock.set(Utc.with_ymd_and_hms(2025, 3, 10, 8, 10, 0).unwrap());
        assert!(engine.is_active_now(&booked));

        clock.set(Utc.with_ymd_and_hms(2025, 3, 10, 9, 30, 0).unwrap());
        assert!(!engine.is_active_now(&booked));
        assert!(engine.has_expired(&booked));
    }
}
