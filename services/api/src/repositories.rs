//! PostgreSQL implementations of the booking store traits

use booking::BookingError;
use sqlx::PgPool;
use std::sync::Arc;

use booking::store::{DeviceStore, ReservationStore, SessionStore, UserDirectory};

pub mod device;
pub mod reservation;
pub mod session;
pub mod user;

pub use device::DeviceRepository;
pub use reservation::ReservationRepository;
pub use session::SessionRepository;
pub use user::UserRepository;

/// Log a database failure and surface it as a store error
pub(crate) fn store_error(context: &str, error: sqlx::Error) -> BookingError {
    tracing::error!("{}: {}", context, error);
    BookingError::Store(format!("{}: {}", context, error))
}

/// The four stores behind one backend
#[derive(Clone)]
pub struct Stores {
    pub reservations: Arc<dyn ReservationStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub devices: Arc<dyn DeviceStore>,
    pub users: Arc<dyn UserDirectory>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            reservations: Arc::new(ReservationRepository::new(pool.clone())),
            sessions: Arc::new(SessionRepository::new(pool.clone())),
            devices: Arc::new(DeviceRepository::new(pool.clone())),
            users: Arc::new(UserRepository::new(pool)),
        }
    }

    pub fn memory(store: booking::MemoryStore) -> Self {
        let store = Arc::new(store);
        Self {
            reservations: store.clone(),
            sessions: store.clone(),
            devices: store.clone(),
            users: store,
        }
    }
}
