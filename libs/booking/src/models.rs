//! Domain models for labs, reservations, sessions and the attendance ledger

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time_window::{SlotGrid, TimeOfDay, TimeWindow};

/// A computer laboratory with PCs numbered `1..=pc_count`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lab {
    pub id: i32,
    pub name: String,
    pub pc_count: i32,
    /// The lab imposes no fixed device numbering
    pub free_mode: bool,
    /// Bookings must follow the standard block grid
    pub standard_grid: bool,
}

impl Lab {
    pub fn has_pc(&self, pc_id: i32) -> bool {
        (1..=self.pc_count).contains(&pc_id)
    }

    pub fn pcs(&self) -> impl Iterator<Item = i32> {
        1..=self.pc_count
    }

    pub fn grid(&self) -> Option<SlotGrid> {
        self.standard_grid.then(SlotGrid::standard)
    }
}

/// Who or what a reservation is held for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubjectKind {
    Individual,
    ClassBlock,
    Maintenance,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Individual => "individual",
            SubjectKind::ClassBlock => "classBlock",
            SubjectKind::Maintenance => "maintenance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "individual" => Some(SubjectKind::Individual),
            "classBlock" => Some(SubjectKind::ClassBlock),
            "maintenance" => Some(SubjectKind::Maintenance),
            _ => None,
        }
    }

    /// Individual and maintenance reservations lock the PC exclusively
    pub fn is_exclusive(&self) -> bool {
        matches!(self, SubjectKind::Individual | SubjectKind::Maintenance)
    }

    /// Whether an existing reservation of kind `other` blocks a new one of this kind
    ///
    /// Class blocks are an overlay: they never block individual bookings and
    /// individual bookings never block them. Two class blocks cannot share a room.
    pub fn conflicts_with(&self, other: SubjectKind) -> bool {
        if self.is_exclusive() {
            other.is_exclusive()
        } else {
            other == SubjectKind::ClassBlock
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ReservationStatus::Active),
            "cancelled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

/// A PC held for a window on a lab-local date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub lab_id: i32,
    pub pc_id: i32,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub window: TimeWindow,
    /// RUT of the person, or of the staff member for class blocks and maintenance
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    /// Class name for class blocks
    pub title: Option<String>,
    /// Shared by every PC row of one class block
    pub block_id: Option<Uuid>,
    /// Declared purpose of an individual booking
    pub activity: Option<String>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    /// Whether this reservation currently blocks a new one of `kind` in `window`
    pub fn blocks(&self, kind: SubjectKind, window: &TimeWindow) -> bool {
        self.is_active() && kind.conflicts_with(self.subject_kind) && self.window.overlaps(window)
    }

    /// Whether the reservation covers the given lab-local instant
    pub fn is_running_at(&self, date: NaiveDate, time: TimeOfDay) -> bool {
        self.is_active() && self.date == date && self.window.contains(time)
    }

    /// Whether the reservation is over at the given lab-local instant
    pub fn has_ended_by(&self, date: NaiveDate, time: TimeOfDay) -> bool {
        self.date < date || (self.date == date && self.window.end() <= time)
    }
}

/// Insert payload for a reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub lab_id: i32,
    pub pc_id: i32,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub subject_id: String,
    pub subject_kind: SubjectKind,
    pub title: Option<String>,
    pub block_id: Option<Uuid>,
    pub activity: Option<String>,
}

impl NewReservation {
    pub fn individual(
        subject_id: impl Into<String>,
        lab_id: i32,
        pc_id: i32,
        date: NaiveDate,
        window: TimeWindow,
    ) -> Self {
        Self {
            lab_id,
            pc_id,
            date,
            window,
            subject_id: subject_id.into(),
            subject_kind: SubjectKind::Individual,
            title: None,
            block_id: None,
            activity: None,
        }
    }

    pub fn with_kind(mut self, kind: SubjectKind) -> Self {
        self.subject_kind = kind;
        self
    }

    pub fn with_activity(mut self, activity: Option<String>) -> Self {
        self.activity = activity;
        self
    }

    pub fn into_reservation(self, id: Uuid, created_at: DateTime<Utc>) -> Reservation {
        Reservation {
            id,
            lab_id: self.lab_id,
            pc_id: self.pc_id,
            date: self.date,
            window: self.window,
            subject_id: self.subject_id,
            subject_kind: self.subject_kind,
            title: self.title,
            block_id: self.block_id,
            activity: self.activity,
            status: ReservationStatus::Active,
            created_at,
            cancelled_at: None,
        }
    }
}

/// Standing exclusion of a PC, without a time bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceMark {
    pub lab_id: i32,
    pub pc_id: i32,
    pub since: DateTime<Utc>,
}

/// Answer of an availability check
#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub available: bool,
    pub conflicting_reservation: Option<Reservation>,
    pub under_maintenance: bool,
}

impl Availability {
    pub fn free() -> Self {
        Self {
            available: true,
            conflicting_reservation: None,
            under_maintenance: false,
        }
    }
}

/// What a PC looks like to the lab map for one window
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PcState {
    Free,
    Maintenance,
    Individual { reservation_id: Uuid, subject_id: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PcOccupancy {
    pub pc_id: i32,
    #[serde(flatten)]
    pub state: PcState,
    /// Class block drawn as a parallel informational layer
    pub class_block: Option<Uuid>,
}

impl PcOccupancy {
    pub fn is_occupied(&self) -> bool {
        !matches!(self.state, PcState::Free)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }
}

/// A usage session observed on a kiosk device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub subject_id: String,
    pub device_number: i32,
    pub lab_id: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub(crate) fn end(&mut self, reason: &str, at: DateTime<Utc>) {
        self.status = SessionStatus::Ended;
        self.ended_at = Some(at);
        self.end_reason = Some(reason.to_string());
    }
}

/// A kiosk announcing itself to the device registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub device_id: Uuid,
    pub lab_id: i32,
    pub ip: String,
    pub hostname: String,
    pub suggested_number: Option<i32>,
}

/// The registry's authoritative binding of a device to a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBinding {
    pub device_id: Uuid,
    pub lab_id: i32,
    pub device_number: Option<i32>,
    pub ip: String,
    pub hostname: String,
    pub registered_at: DateTime<Utc>,
}

/// Answer of a registration call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub device_number: Option<i32>,
    pub free_mode: bool,
}

/// Read-only directory entry used for attribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub rut: String,
    pub full_name: String,
    pub program: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerSource {
    Reservation,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Reserved,
    InProgress,
    Completed,
}

/// One line of the bitácora
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRow {
    pub id: Uuid,
    pub rut: String,
    pub carrera: Option<String>,
    pub fecha_reserva: NaiveDate,
    pub hora_inicio: TimeOfDay,
    pub hora_termino: TimeOfDay,
    pub lab_id: i32,
    pub pc_id: i32,
    pub status: LedgerStatus,
    pub tipo_actividad: Option<String>,
    pub source: LedgerSource,
}

/// Deduplication key of a ledger row
pub type LedgerKey = (String, i32, i32, NaiveDate, TimeOfDay, TimeOfDay);

impl LedgerRow {
    pub fn key(&self) -> LedgerKey {
        (
            self.rut.clone(),
            self.lab_id,
            self.pc_id,
            self.fecha_reserva,
            self.hora_inicio,
            self.hora_termino,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_matrix() {
        use SubjectKind::*;

        assert!(Individual.conflicts_with(Individual));
        assert!(Individual.conflicts_with(Maintenance));
        assert!(Maintenance.conflicts_with(Individual));
        assert!(!Individual.conflicts_with(ClassBlock));
        assert!(!ClassBlock.conflicts_with(Individual));
        assert!(!ClassBlock.conflicts_with(Maintenance));
        assert!(ClassBlock.conflicts_with(ClassBlock));
    }

    #[test]
    fn test_subject_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&SubjectKind::ClassBlock).unwrap(),
            "\"classBlock\""
        );
        assert_eq!(SubjectKind::parse("maintenance"), Some(SubjectKind::Maintenance));
        assert_eq!(SubjectKind::parse("class_block"), None);
    }

    #[test]
    fn test_reservation_serializes_flat_window() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let window = TimeWindow::parse("08:10", "09:30").unwrap();
        let reservation = NewReservation::individual("11111111-1", 1, 3, date, window)
            .into_reservation(Uuid::nil(), Utc::now());

        let json = serde_json::to_value(&reservation).unwrap();
        assert_eq!(json["start"], "08:10");
        assert_eq!(json["end"], "09:30");
        assert_eq!(json["subject_kind"], "individual");
    }
}
