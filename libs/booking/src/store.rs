//! Storage seams of the reservation core
//!
//! The durable store is the only serialization point: implementations must
//! make [`ReservationStore::insert`] and [`ReservationStore::reslot`] an
//! atomic re-check-then-write, since several API instances may run at once.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
    error::BookingResult,
    models::{
        DeviceBinding, Lab, MaintenanceMark, NewReservation, Reservation, SessionRecord,
        UserProfile,
    },
    time_window::{TimeOfDay, TimeWindow},
};

/// Durable table of reservations, labs and maintenance marks
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn lab(&self, lab_id: i32) -> BookingResult<Option<Lab>>;

    async fn labs(&self) -> BookingResult<Vec<Lab>>;

    async fn set_free_mode(&self, lab_id: i32, free_mode: bool) -> BookingResult<Option<Lab>>;

    async fn get(&self, id: Uuid) -> BookingResult<Option<Reservation>>;

    /// Every reservation, in any status, of one PC on one date
    async fn find_for_pc(
        &self,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
    ) -> BookingResult<Vec<Reservation>>;

    /// Active reservations of a date, ordered by PC then start time
    async fn list_by_date(
        &self,
        date: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>>;

    /// Active reservations with `from <= date <= to`, ordered by date then start time
    async fn list_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<Reservation>>;

    /// Atomically re-check the slot and insert
    ///
    /// Fails with a conflict naming the blocking reservation when an active
    /// overlapping reservation of a conflicting kind exists, and with a
    /// maintenance conflict when an individual booking targets a marked PC.
    async fn insert(
        &self,
        reservation: NewReservation,
        created_at: DateTime<Utc>,
    ) -> BookingResult<Reservation>;

    /// Atomically move a reservation to a new window on the same PC and date,
    /// ignoring its own prior slot when re-checking. Individual bookings on a
    /// marked PC cannot move.
    async fn reslot(&self, id: Uuid, window: TimeWindow) -> BookingResult<Reservation>;

    /// Mark a reservation cancelled; cancelling twice returns it unchanged
    async fn cancel(&self, id: Uuid, at: DateTime<Utc>) -> BookingResult<Option<Reservation>>;

    async fn block_members(&self, block_id: Uuid) -> BookingResult<Vec<Reservation>>;

    async fn maintenance_mark(
        &self,
        lab_id: i32,
        pc_id: i32,
    ) -> BookingResult<Option<MaintenanceMark>>;

    async fn maintenance_marks(&self, lab_id: i32) -> BookingResult<Vec<MaintenanceMark>>;

    /// Set the mark unless an individual booking is running on the PC at
    /// `date` `time`; an existing mark keeps its original `since`
    ///
    /// Serialised with `insert` and `reslot` of the same PC.
    async fn set_maintenance_mark(
        &self,
        mark: MaintenanceMark,
        date: NaiveDate,
        time: TimeOfDay,
    ) -> BookingResult<MaintenanceMark>;

    /// Clear the mark, returning whether one existed
    async fn clear_maintenance_mark(&self, lab_id: i32, pc_id: i32) -> BookingResult<bool>;
}

/// Server-side record of kiosk usage sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a session, ending any still-active session of the same device
    async fn start_session(
        &self,
        subject_id: &str,
        lab_id: i32,
        device_number: i32,
        at: DateTime<Utc>,
    ) -> BookingResult<SessionRecord>;

    /// End a session; ending an ended session returns it unchanged
    async fn end_session(
        &self,
        session_id: Uuid,
        reason: &str,
        at: DateTime<Utc>,
    ) -> BookingResult<Option<SessionRecord>>;

    async fn get_session(&self, session_id: Uuid) -> BookingResult<Option<SessionRecord>>;

    /// Record a heartbeat; returns the session as stored
    async fn heartbeat(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> BookingResult<Option<SessionRecord>>;

    /// Sessions whose start lies in `[from, to)`, ordered by start
    async fn sessions_started_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        lab_id: Option<i32>,
    ) -> BookingResult<Vec<SessionRecord>>;
}

/// Device number bindings, keyed by the kiosk's generated device id
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_device(&self, device_id: Uuid) -> BookingResult<Option<DeviceBinding>>;

    async fn claimed_numbers(&self, lab_id: i32) -> BookingResult<Vec<i32>>;

    /// Insert or replace the binding of `binding.device_id`
    ///
    /// Fails with a conflict when the number is already held by another device.
    async fn upsert_device(&self, binding: DeviceBinding) -> BookingResult<DeviceBinding>;
}

/// Read-only view of the user directory
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup(&self, rut: &str) -> BookingResult<Option<UserProfile>>;
}
