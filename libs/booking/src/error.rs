//! Error taxonomy for the reservation and session core
//!
//! Every operation in this crate returns a [`BookingResult`]. Callers at the
//! HTTP edge map the variants onto status codes; nothing here panics across
//! the boundary.

use std::fmt;

use thiserror::Error;

use crate::models::Reservation;

/// Why a write was refused because the slot is taken
#[derive(Debug, Clone)]
pub enum Conflict {
    /// Another reservation already occupies the slot
    Reservation(Box<Reservation>),
    /// The PC carries a standing maintenance mark
    Maintenance { lab_id: i32, pc_id: i32 },
    /// No device number is left in the lab's range
    NoFreeDeviceNumber { lab_id: i32 },
    /// Another device already holds the number
    DeviceNumberTaken { lab_id: i32, device_number: i32 },
    /// Another session was opened on the device at the same moment
    DeviceBusy { lab_id: i32, device_number: i32 },
}

impl Conflict {
    /// The conflicting reservation, when the conflict is caused by one
    pub fn reservation(&self) -> Option<&Reservation> {
        match self {
            Conflict::Reservation(reservation) => Some(reservation),
            _ => None,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Reservation(existing) => write!(
                f,
                "PC {} in lab {} is already booked on {} from {} to {} (reservation {})",
                existing.pc_id,
                existing.lab_id,
                existing.date,
                existing.window.start(),
                existing.window.end(),
                existing.id
            ),
            Conflict::Maintenance { lab_id, pc_id } => {
                write!(f, "PC {} in lab {} is under maintenance", pc_id, lab_id)
            }
            Conflict::NoFreeDeviceNumber { lab_id } => {
                write!(f, "lab {} has no unclaimed device number left", lab_id)
            }
            Conflict::DeviceNumberTaken {
                lab_id,
                device_number,
            } => write!(
                f,
                "device number {} in lab {} belongs to another device",
                device_number, lab_id
            ),
            Conflict::DeviceBusy {
                lab_id,
                device_number,
            } => write!(
                f,
                "a session is being opened on device {} in lab {}",
                device_number, lab_id
            ),
        }
    }
}

/// Errors produced by the allocation engine, the assembler and the stores
#[derive(Error, Debug)]
pub enum BookingError {
    /// Malformed input, rejected before the store is touched
    #[error("validation error: {0}")]
    Validation(String),

    /// Double-booking or maintenance conflict
    #[error("conflict: {0}")]
    Conflict(Conflict),

    /// Unknown reservation, session, lab or device
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The backing store failed
    #[error("store error: {0}")]
    Store(String),
}

impl BookingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BookingError::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BookingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict_with(reservation: Reservation) -> Self {
        BookingError::Conflict(Conflict::Reservation(Box::new(reservation)))
    }
}

/// Type alias for Result with BookingError
pub type BookingResult<T> = Result<T, BookingError>;
