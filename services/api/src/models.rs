//! API models for request and response payloads

use booking::{
    ClassBlockMode, TimeWindow,
    models::{Lab, SessionRecord},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query of `GET /availability`
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub lab_id: i32,
    pub pc_id: i32,
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
}

/// Query selecting one day, optionally one lab
#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
    pub lab_id: Option<i32>,
}

/// Query of `GET /labs/:lab_id/occupancy`
#[derive(Debug, Deserialize)]
pub struct OccupancyQuery {
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
}

/// Query of `GET /bitacora`
#[derive(Debug, Deserialize)]
pub struct BitacoraQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub lab_id: Option<i32>,
}

/// Request for an individual reservation
#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub lab_id: i32,
    pub pc_id: i32,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub window: TimeWindow,
    /// Staff may book on behalf of someone; defaults to the caller
    pub subject_id: Option<String>,
    pub activity: Option<String>,
}

/// Request to move a reservation to a new window
#[derive(Debug, Deserialize)]
pub struct EditReservationRequest {
    #[serde(flatten)]
    pub window: TimeWindow,
}

#[derive(Debug, Deserialize)]
pub struct CreateClassBlockRequest {
    pub lab_id: i32,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub window: TimeWindow,
    pub title: String,
    #[serde(default)]
    pub mode: ClassBlockMode,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub on: bool,
}

#[derive(Debug, Deserialize)]
pub struct FreeModeRequest {
    pub free_mode: bool,
}

/// Request opening a kiosk session for the caller
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub lab_id: i32,
    pub device_number: i32,
}

#[derive(Debug, Deserialize)]
pub struct EndSessionRequest {
    #[serde(default = "default_end_reason")]
    pub reason: String,
}

fn default_end_reason() -> String {
    "logout".to_string()
}

/// Answer of the heartbeat endpoint
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub session_id: Uuid,
    pub active: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl From<&SessionRecord> for HeartbeatResponse {
    fn from(session: &SessionRecord) -> Self {
        Self {
            session_id: session.session_id,
            active: session.is_active(),
            last_seen_at: session.last_seen_at,
        }
    }
}

/// Request body of `POST /devices/register`
#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub device_id: Uuid,
    pub lab_id: i32,
    pub ip: String,
    pub hostname: String,
    pub suggested_number: Option<i32>,
}

/// Lab with its standing maintenance marks
#[derive(Debug, Serialize)]
pub struct LabResponse {
    #[serde(flatten)]
    pub lab: Lab,
    pub maintenance: Vec<i32>,
}

/// Message published on a lab's event channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LabEvent {
    ReservationCreated { reservation_id: Uuid, pc_id: i32, date: NaiveDate },
    ReservationUpdated { reservation_id: Uuid, pc_id: i32, date: NaiveDate },
    ReservationCancelled { reservation_id: Uuid, pc_id: i32, date: NaiveDate },
    ClassBlockCreated { block_id: Uuid, date: NaiveDate, created: usize, failed: usize },
    ClassBlockCancelled { block_id: Uuid, cancelled: usize },
    MaintenanceChanged { pc_id: i32, on: bool },
    FreeModeChanged { free_mode: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_request_reads_flat_window() {
        let request: CreateReservationRequest = serde_json::from_value(serde_json::json!({
            "lab_id": 1,
            "pc_id": 3,
            "date": "2025-03-10",
            "start": "08:10",
            "end": "09:30"
        }))
        .unwrap();

        assert_eq!(request.window, TimeWindow::parse("08:10", "09:30").unwrap());
        assert_eq!(request.subject_id, None);
    }

    #[test]
    fn test_reservation_request_rejects_inverted_window() {
        let parsed = serde_json::from_value::<CreateReservationRequest>(serde_json::json!({
            "lab_id": 1,
            "pc_id": 3,
            "date": "2025-03-10",
            "start": "10:00",
            "end": "09:00"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_lab_event_wire_shape() {
        let event = LabEvent::FreeModeChanged { free_mode: true };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "free_mode_changed");
        assert_eq!(json["free_mode"], true);
    }
}
