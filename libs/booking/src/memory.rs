//! In-process implementation of every store trait
//!
//! All state sits behind one async mutex, which makes each check-and-write
//! atomic the same way a serializable transaction would.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{BookingError, BookingResult, Conflict},
    models::{
        DeviceBinding, Lab, MaintenanceMark, NewReservation, Reservation, ReservationStatus,
        SessionRecord, SessionStatus, SubjectKind, UserProfile,
    },
    store::{DeviceStore, ReservationStore, SessionStore, UserDirectory},
    time_window::{TimeOfDay, TimeWindow},
};

#[derive(Default)]
struct MemoryState {
    labs: HashMap<i32, Lab>,
    reservations: Vec<Reservation>,
    maintenance: HashMap<(i32, i32), MaintenanceMark>,
    sessions: Vec<SessionRecord>,
    devices: HashMap<Uuid, DeviceBinding>,
    users: HashMap<String, UserProfile>,
}

impl MemoryState {
    fn first_blocker(
        &self,
        candidate: &NewReservation,
        ignore: Option<Uuid>,
    ) -> Option<&Reservation> {
        self.reservations
            .iter()
            .filter(|r| Some(r.id) != ignore)
            .filter(|r| {
                r.lab_id == candidate.lab_id && r.pc_id == candidate.pc_id && r.date == candidate.date
            })
            .filter(|r| r.blocks(candidate.subject_kind, &candidate.window))
            .min_by_key(|r| r.window.start())
    }

    fn check_maintenance(&self, candidate: &NewReservation) -> BookingResult<()> {
        let key = (candidate.lab_id, candidate.pc_id);
        if candidate.subject_kind == SubjectKind::Individual && self.maintenance.contains_key(&key)
        {
            return Err(BookingError::Conflict(Conflict::Maintenance {
                lab_id: candidate.lab_id,
                pc_id: candidate.pc_id,
            }));
        }
        Ok(())
    }
}

/// Store backed by process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given labs
    pub async fn with_labs(labs: impl IntoIterator<Item = Lab>) -> Self {
        let store = Self::new();
        for lab in labs {
            store.add_lab(lab).await;
        }
        store
    }

    pub async fn add_lab(&self, lab: Lab) {
        self.state.lock().await.labs.insert(lab.id, lab);
    }

    pub async fn add_user(&self, profile: UserProfile) {
        self.state
            .lock()
            .await
            .users
            .insert(profile.rut.clone(), profile);
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn lab(&self, lab_id: i32) -> BookingResult<Option<Lab>> {
        Ok(self.state.lock().await.labs.get(&lab_id).cloned())
    }

    async fn labs(&self) -> BookingResult<Vec<Lab>> {
        let mut labs: Vec<Lab> = self.state.lock().await.labs.values().cloned().collect();
        labs.sort_by_key(|lab| lab.id);
        Ok(labs)
    }

    async fn set_free_mode(&self, lab_id: i32, free_mode: bool) -> BookingResult<Option<Lab>> {
        let mut state = self.state.lock().await;
        Ok(state.labs.get_mut(&lab_id).map(|lab| {
            lab.free_mode = free_mode;
            lab.clone()
        }))
    }

    async fn get(&self, id: Uuid) -> BookingResult<Option<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.reservations.iter().find(|r| r.id == id).cloned())
    }

    async fn find_for_pc(
        &self,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
    ) -> BookingResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.lab_id == lab_id && r.pc_id == pc_id && r.date == date)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.window.start());
        Ok(found)
    }

    async fn list_by_date(
        &self,
        date: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.is_active() && r.date == date)
            .filter(|r| lab_id.is_none_or(|lab| r.lab_id == lab))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.lab_id, r.pc_id, r.window.start()));
        Ok(found)
    }

    async fn list_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut found: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.is_active() && r.date >= from && r.date <= to)
            .filter(|r| lab_id.is_none_or(|lab| r.lab_id == lab))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.date, r.window.start()));
        Ok(found)
    }

    async fn insert(
        &self,
        reservation: NewReservation,
        created_at: DateTime<Utc>,
    ) -> BookingResult<Reservation> {
        let mut state = self.state.lock().await;

        state.check_maintenance(&reservation)?;
        if let Some(existing) = state.first_blocker(&reservation, None) {
            debug!(
                "Rejecting {} on lab {} pc {}: blocked by {}",
                reservation.window, reservation.lab_id, reservation.pc_id, existing.id
            );
            return Err(BookingError::conflict_with(existing.clone()));
        }

        let stored = reservation.into_reservation(Uuid::new_v4(), created_at);
        state.reservations.push(stored.clone());
        Ok(stored)
    }

    async fn reslot(&self, id: Uuid, window: TimeWindow) -> BookingResult<Reservation> {
        let mut state = self.state.lock().await;

        let current = state
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
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
        state.check_maintenance(&candidate)?;
        if let Some(existing) = state.first_blocker(&candidate, Some(id)) {
            return Err(BookingError::conflict_with(existing.clone()));
        }

        let stored = state
            .reservations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| BookingError::not_found("reservation", id))?;
        stored.window = window;
        Ok(stored.clone())
    }

    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> BookingResult<Option<Reservation>> {
        let mut state = self.state.lock().await;
        Ok(state.reservations.iter_mut().find(|r| r.id == id).map(|r| {
            if r.is_active() {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(at);
            }
            r.clone()
        }))
    }

    async fn block_members(&self, block_id: Uuid) -> BookingResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut members: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.block_id == Some(block_id))
            .cloned()
            .collect();
        members.sort_by_key(|r| r.pc_id);
        Ok(members)
    }

    async fn maintenance_mark(
        &self,
        lab_id: i32,
        pc_id: i32,
    ) -> BookingResult<Option<MaintenanceMark>> {
        let state = self.state.lock().await;
        Ok(state.maintenance.get(&(lab_id, pc_id)).cloned())
    }

    async fn maintenance_marks(&self, lab_id: i32) -> BookingResult<Vec<MaintenanceMark>> {
        let state = self.state.lock().await;
        let mut marks: Vec<MaintenanceMark> = state
            .maintenance
            .values()
            .filter(|mark| mark.lab_id == lab_id)
            .cloned()
            .collect();
        marks.sort_by_key(|mark| mark.pc_id);
        Ok(marks)
    }

    async fn set_maintenance_mark(
        &self,
        mark: MaintenanceMark,
        date: NaiveDate,
        time: TimeOfDay,
    ) -> BookingResult<MaintenanceMark> {
        let mut state = self.state.lock().await;

        let running = state.reservations.iter().find(|r| {
            r.lab_id == mark.lab_id
                && r.pc_id == mark.pc_id
                && r.subject_kind == SubjectKind::Individual
                && r.is_running_at(date, time)
        });
        if let Some(reservation) = running {
            return Err(BookingError::conflict_with(reservation.clone()));
        }

        Ok(state
            .maintenance
            .entry((mark.lab_id, mark.pc_id))
            .or_insert(mark)
            .clone())
    }

    async fn clear_maintenance_mark(&self, lab_id: i32, pc_id: i32) -> BookingResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.maintenance.remove(&(lab_id, pc_id)).is_some())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn start_session(
        &self,
        subject_id: &str,
        lab_id: i32,
        device_number: i32,
        at: DateTime<Utc>,
    ) -> BookingResult<SessionRecord> {
        let mut state = self.state.lock().await;

        for stale in state
            .sessions
            .iter_mut()
            .filter(|s| s.is_active() && s.lab_id == lab_id && s.device_number == device_number)
        {
            stale.end("superseded", at);
        }

        let session = SessionRecord {
            session_id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            device_number,
            lab_id,
            started_at: at,
            ended_at: None,
            last_seen_at: Some(at),
            end_reason: None,
            status: SessionStatus::Active,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn end_session(
        &self,
        session_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<Option<SessionRecord>> {
        let mut state = self.state.lock().await;
        Ok(state
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .map(|s| {
                if s.is_active() {
                    s.end(reason, at);
                }
                s.clone()
            }))
    }

    async fn get_session(&self, session_id: Uuid) -> BookingResult<Option<SessionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    async fn heartbeat(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> BookingResult<Option<SessionRecord>> {
        let mut state = self.state.lock().await;
        Ok(state
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .map(|s| {
                if s.is_active() {
                    s.last_seen_at = Some(at);
                }
                s.clone()
            }))
    }

    async fn sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<SessionRecord>> {
        let state = self.state.lock().await;
        let mut found: Vec<SessionRecord> = state
            .sessions
            .iter()
            .filter(|s| s.started_at >= from && s.started_at < to)
            .filter(|s| lab_id.is_none_or(|lab| s.lab_id == lab))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.started_at);
        Ok(found)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn find_device(&self, device_id: Uuid) -> BookingResult<Option<DeviceBinding>> {
        Ok(self.state.lock().await.devices.get(&device_id).cloned())
    }

    async fn claimed_numbers(&self, lab_id: i32) -> BookingResult<Vec<i32>> {
        let state = self.state.lock().await;
        let mut numbers: Vec<i32> = state
            .devices
            .values()
            .filter(|d| d.lab_id == lab_id)
            .filter_map(|d| d.device_number)
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    async fn upsert_device(&self, binding: DeviceBinding) -> BookingResult<DeviceBinding> {
        let mut state = self.state.lock().await;

        if let Some(number) = binding.device_number {
            let taken = state.devices.values().any(|d| {
                d.device_id != binding.device_id
                    && d.lab_id == binding.lab_id
                    && d.device_number == Some(number)
            });
            if taken {
                return Err(BookingError::Conflict(Conflict::DeviceNumberTaken {
                    lab_id: binding.lab_id,
                    device_number: number,
                }));
            }
        }

        state.devices.insert(binding.device_id, binding.clone());
        Ok(binding)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn lookup(&self, rut: &str) -> BookingResult<Option<UserProfile>> {
        Ok(self.state.lock().await.users.get(rut).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lab() -> Lab {
        Lab {
            id: 1,
            name: "Lab 1".to_string(),
            pc_count: 40,
            free_mode: false,
            standard_grid: false,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_inserts_admit_exactly_one() {
        let store = MemoryStore::with_labs([lab()]).await;
        let window = TimeWindow::parse("08:10", "09:30").unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert(
                            NewReservation::individual(format!("rut-{i}"), 1, 3, date(), window),
                            Utc::now(),
                        )
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_class_block_and_individual_coexist() {
        let store = MemoryStore::with_labs([lab()]).await;
        let window = TimeWindow::parse("08:10", "09:30").unwrap();

        store
            .insert(
                NewReservation::individual("staff", 1, 5, date(), window)
                    .with_kind(SubjectKind::ClassBlock),
                Utc::now(),
            )
            .await
            .unwrap();
        store
            .insert(
                NewReservation::individual("student", 1, 5, date(), window),
                Utc::now(),
            )
            .await
            .unwrap();

        let second_class = store
            .insert(
                NewReservation::individual("staff", 1, 5, date(), window)
                    .with_kind(SubjectKind::ClassBlock),
                Utc::now(),
            )
            .await;
        assert!(matches!(second_class, Err(BookingError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_mark_and_running_booking_exclude_each_other() {
        let store = MemoryStore::with_labs([lab()]).await;
        let window = TimeWindow::parse("08:10", "09:30").unwrap();
        let now: TimeOfDay = "08:30".parse().unwrap();
        let mark = |pc_id| MaintenanceMark {
            lab_id: 1,
            pc_id,
            since: Utc::now(),
        };

        store
            .insert(
                NewReservation::individual("student", 1, 5, date(), window),
                Utc::now(),
            )
            .await
            .unwrap();
        let refused = store.set_maintenance_mark(mark(5), date(), now).await;
        assert!(matches!(refused, Err(BookingError::Conflict(Conflict::Reservation(_)))));

        store.set_maintenance_mark(mark(6), date(), now).await.unwrap();
        let blocked = store
            .insert(
                NewReservation::individual("student", 1, 6, date(), window),
                Utc::now(),
            )
            .await;
        assert!(matches!(
            blocked,
            Err(BookingError::Conflict(Conflict::Maintenance { pc_id: 6, .. }))
        ));

        // class blocks still fan out over marked PCs
        store
            .insert(
                NewReservation::individual("staff", 1, 6, date(), window)
                    .with_kind(SubjectKind::ClassBlock),
                Utc::now(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_session_supersedes_previous_on_same_device() {
        let store = MemoryStore::new();
        let first = store.start_session("a", 1, 4, Utc::now()).await.unwrap();
        let second = store.start_session("b", 1, 4, Utc::now()).await.unwrap();

        let first = store.get_session(first.session_id).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Ended);
        assert_eq!(first.end_reason.as_deref(), Some("superseded"));
        assert!(second.is_active());
    }
}
