//! Reservation and session allocation core for shared computer labs
//!
//! This crate decides PC availability, books individual PCs and class
//! blocks without double-booking, hands out kiosk device numbers and merges
//! reservations with observed kiosk sessions into the attendance ledger
//! (bitácora). Storage is reached only through the traits in [`store`].

pub mod allocation;
pub mod bitacora;
pub mod clock;
pub mod devices;
pub mod error;
pub mod memory;
pub mod models;
pub mod store;
pub mod time_window;

pub use allocation::{AllocationEngine, ClassBlockMode, ClassBlockOutcome};
pub use bitacora::BitacoraAssembler;
pub use clock::{Clock, FixedClock, LabTimezone, SystemClock};
pub use devices::DeviceRegistrar;
pub use error::{BookingError, BookingResult, Conflict};
pub use memory::MemoryStore;
pub use time_window::{SlotGrid, TimeOfDay, TimeWindow};
