//! Server side of the kiosk device registry

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    clock::Clock,
    error::{BookingError, BookingResult, Conflict},
    models::{DeviceBinding, DeviceRegistration, Lab, RegistrationOutcome},
    store::{DeviceStore, ReservationStore},
};

const MAX_CLAIM_ATTEMPTS: usize = 3;

/// Hands out device numbers, idempotently per device id
#[derive(Clone)]
pub struct DeviceRegistrar {
    labs: Arc<dyn ReservationStore>,
    devices: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
}

impl DeviceRegistrar {
    pub fn new(
        labs: Arc<dyn ReservationStore>,
        devices: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            labs,
            devices,
            clock,
        }
    }

    /// Register a kiosk and return its authoritative number
    ///
    /// Repeated calls with the same device id return the same number. A lab
    /// in free mode hands out no new numbers.
    pub async fn register(
        &self,
        registration: DeviceRegistration,
    ) -> BookingResult<RegistrationOutcome> {
        let lab = self
            .labs
            .lab(registration.lab_id)
            .await?
            .ok_or_else(|| BookingError::not_found("lab", registration.lab_id))?;

        let existing = self
            .devices
            .find_device(registration.device_id)
            .await?
            .filter(|binding| binding.lab_id == lab.id)
            .and_then(|binding| binding.device_number);

        let device_number = match existing {
            Some(number) => {
                self.bind(&registration, Some(number)).await?;
                Some(number)
            }
            None if lab.free_mode => {
                self.bind(&registration, None).await?;
                None
            }
            None => Some(self.claim(&registration, &lab).await?),
        };

        info!(
            "Device {} registered in lab {} as {:?} (free mode: {})",
            registration.device_id, lab.id, device_number, lab.free_mode
        );

        Ok(RegistrationOutcome {
            device_number,
            free_mode: lab.free_mode,
        })
    }

    async fn claim(&self, registration: &DeviceRegistration, lab: &Lab) -> BookingResult<i32> {
        let mut last_error = None;

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let claimed = self.devices.claimed_numbers(lab.id).await?;
            let number = pick_number(lab, &claimed, registration.suggested_number)
                .ok_or_else(|| {
                    BookingError::Conflict(Conflict::NoFreeDeviceNumber { lab_id: lab.id })
                })?;

            match self.bind(registration, Some(number)).await {
                Ok(_) => return Ok(number),
                Err(BookingError::Conflict(conflict @ Conflict::DeviceNumberTaken { .. })) => {
                    warn!("Lost race for device number: {}", conflict);
                    last_error = Some(BookingError::Conflict(conflict));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BookingError::Conflict(Conflict::NoFreeDeviceNumber { lab_id: lab.id })
        }))
    }

    async fn bind(
        &self,
        registration: &DeviceRegistration,
        device_number: Option<i32>,
    ) -> BookingResult<DeviceBinding> {
        self.devices
            .upsert_device(DeviceBinding {
                device_id: registration.device_id,
                lab_id: registration.lab_id,
                device_number,
                ip: registration.ip.clone(),
                hostname: registration.hostname.clone(),
                registered_at: self.clock.now(),
            })
            .await
    }
}

/// The suggested number when it is free and in range, else the lowest free one
fn pick_number(lab: &Lab, claimed: &[i32], suggested: Option<i32>) -> Option<i32> {
    let is_free = |n: &i32| lab.has_pc(*n) && !claimed.contains(n);
    suggested
        .filter(is_free)
        .or_else(|| lab.pcs().find(is_free))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, memory::MemoryStore};
    use uuid::Uuid;

    fn lab(free_mode: bool) -> Lab {
        Lab {
            id: 1,
            name: "Lab 1".to_string(),
            pc_count: 3,
            free_mode,
            standard_grid: false,
        }
    }

    fn registration(device_id: Uuid, ip: &str, suggested: Option<i32>) -> DeviceRegistration {
        DeviceRegistration {
            device_id,
            lab_id: 1,
            ip: ip.to_string(),
            hostname: "kiosk".to_string(),
            suggested_number: suggested,
        }
    }

    async fn registrar(free_mode: bool) -> DeviceRegistrar {
        let store = Arc::new(MemoryStore::with_labs([lab(free_mode)]).await);
        DeviceRegistrar::new(store.clone(), store, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let registrar = registrar(false).await;
        let device = Uuid::new_v4();

        let first = registrar
            .register(registration(device, "10.0.0.5", None))
            .await
            .unwrap();
        let second = registrar
            .register(registration(device, "10.0.0.5", None))
            .await
            .unwrap();

        assert_eq!(first.device_number, Some(1));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_suggested_number_honoured_when_free() {
        let registrar = registrar(false).await;
        let a = registrar
            .register(registration(Uuid::new_v4(), "10.0.0.5", Some(2)))
            .await
            .unwrap();
        let b = registrar
            .register(registration(Uuid::new_v4(), "10.0.0.6", Some(2)))
            .await
            .unwrap();

        assert_eq!(a.device_number, Some(2));
        assert_eq!(b.device_number, Some(1));
    }

    #[tokio::test]
    async fn test_full_lab_is_a_conflict() {
        let registrar = registrar(false).await;
        for i in 0..3 {
            registrar
                .register(registration(Uuid::new_v4(), &format!("10.0.0.{i}"), None))
                .await
                .unwrap();
        }

        let overflow = registrar
            .register(registration(Uuid::new_v4(), "10.0.0.9", None))
            .await;
        assert!(matches!(
            overflow,
            Err(BookingError::Conflict(Conflict::NoFreeDeviceNumber { lab_id: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_free_mode_assigns_no_number() {
        let registrar = registrar(true).await;
        let outcome = registrar
            .register(registration(Uuid::new_v4(), "10.0.0.5", Some(2)))
            .await
            .unwrap();

        assert_eq!(outcome.device_number, None);
        assert!(outcome.free_mode);
    }
}
