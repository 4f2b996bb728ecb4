//! Application state shared across handlers

use std::sync::Arc;

use booking::{
    AllocationEngine, BitacoraAssembler, Clock, DeviceRegistrar, LabTimezone, store::SessionStore,
};
use common::events::LabEventPublisher;
use sqlx::PgPool;

use crate::{middleware::JwtKeys, models::LabEvent, repositories::Stores};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: AllocationEngine,
    pub assembler: BitacoraAssembler,
    pub registrar: DeviceRegistrar,
    pub sessions: Arc<dyn SessionStore>,
    pub clock: Arc<dyn Clock>,
    pub jwt: JwtKeys,
    /// Present only for the postgres backend
    pub db_pool: Option<PgPool>,
    pub events: Option<LabEventPublisher>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        clock: Arc<dyn Clock>,
        timezone: LabTimezone,
        jwt: JwtKeys,
    ) -> Self {
        Self {
            engine: AllocationEngine::new(stores.reservations.clone(), clock.clone(), timezone),
            assembler: BitacoraAssembler::new(
                stores.reservations.clone(),
                stores.sessions.clone(),
                stores.users,
                clock.clone(),
                timezone,
            ),
            registrar: DeviceRegistrar::new(stores.reservations, stores.devices, clock.clone()),
            sessions: stores.sessions,
            clock,
            jwt,
            db_pool: None,
            events: None,
        }
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_events(mut self, publisher: LabEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    /// Publish a lab event when a publisher is configured; never fails
    pub async fn publish(&self, lab_id: i32, event: LabEvent) {
        if let Some(publisher) = &self.events {
            publisher.publish_quietly(lab_id, &event).await;
        }
    }
}
