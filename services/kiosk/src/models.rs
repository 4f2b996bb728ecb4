//! Documents the kiosk keeps on disk and shows to the local UI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content of the device-identity file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// Generated once per installation
    pub device_id: Uuid,
    /// Authoritative number from the registry; absent before registration and in free mode
    pub device_number: Option<i32>,
    pub lab_id: Option<i32>,
    #[serde(default)]
    pub free_mode: bool,
}

impl DeviceIdentity {
    pub fn unregistered(device_id: Uuid) -> Self {
        Self {
            device_id,
            device_number: None,
            lab_id: None,
            free_mode: false,
        }
    }

    /// Whether this identity holds a usable registration for `lab_id`
    pub fn is_registered_in(&self, lab_id: i32) -> bool {
        self.lab_id == Some(lab_id) && (self.device_number.is_some() || self.free_mode)
    }
}

/// Content of the session file, the source of truth after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub session_id: Uuid,
    pub rut: String,
    pub device_number: i32,
    pub lab_id: i32,
    pub started_at: DateTime<Utc>,
    pub token: String,
}

/// A persisted session as shown to the UI, without the bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub rut: String,
    pub device_number: i32,
    pub lab_id: i32,
    pub started_at: DateTime<Utc>,
}

impl From<&PersistedSession> for SessionView {
    fn from(session: &PersistedSession) -> Self {
        Self {
            session_id: session.session_id,
            rut: session.rut.clone(),
            device_number: session.device_number,
            lab_id: session.lab_id,
            started_at: session.started_at,
        }
    }
}
