//! Kiosk process of the lab reservation system
//!
//! Runs on each lab PC: keeps the device registered, owns the user's
//! session from login to logout (surviving restarts through files on disk),
//! keeps today's reservations in sync and serves all of it to the local UI
//! over a loopback-only HTTP interface.

pub mod config;
pub mod device;
pub mod error;
pub mod models;
pub mod net;
pub mod persist;
pub mod remote;
pub mod rpc;
pub mod session;
pub mod subscription;

pub use error::{KioskError, KioskResult};
pub use session::SessionManager;
