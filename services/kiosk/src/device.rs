//! Kiosk side of the device registry
//!
//! A kiosk generates its id once, registers it with the backend on every
//! boot and keeps the returned number in the device file. When the backend
//! cannot be reached, a binding already on disk for the same lab stands in.

use std::sync::Arc;

use booking::models::DeviceRegistration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::{KioskError, KioskResult},
    models::DeviceIdentity,
    net,
    persist::JsonFile,
    remote::RegistryClient,
};

pub struct DeviceRegistry {
    file: JsonFile<DeviceIdentity>,
    registry: Arc<dyn RegistryClient>,
    backend_url: String,
    suggested_number: Option<i32>,
}

impl DeviceRegistry {
    pub fn new(
        file: JsonFile<DeviceIdentity>,
        registry: Arc<dyn RegistryClient>,
        backend_url: impl Into<String>,
        suggested_number: Option<i32>,
    ) -> Self {
        Self {
            file,
            registry,
            backend_url: backend_url.into(),
            suggested_number,
        }
    }

    /// The device id, generated and stored on first use
    pub async fn ensure_device_id(&self) -> KioskResult<Uuid> {
        if let Some(identity) = self.file.read().await {
            return Ok(identity.device_id);
        }

        let device_id = Uuid::new_v4();
        self.file
            .write(&DeviceIdentity::unregistered(device_id))
            .await?;
        info!("Generated device id {}", device_id);
        Ok(device_id)
    }

    /// Register with the backend and store the authoritative number
    ///
    /// Safe on every boot: the backend keys registrations by device id.
    pub async fn ensure_registered(&self, lab_id: i32) -> KioskResult<DeviceIdentity> {
        let device_id = self.ensure_device_id().await?;
        let stored = self
            .file
            .read()
            .await
            .filter(|identity| identity.device_id == device_id);

        let suggested_number = stored
            .as_ref()
            .filter(|identity| identity.lab_id == Some(lab_id))
            .and_then(|identity| identity.device_number)
            .or(self.suggested_number);
        let registration = DeviceRegistration {
            device_id,
            lab_id,
            ip: net::outbound_ip_or_unspecified(&self.backend_url)
                .await
                .to_string(),
            hostname: net::hostname().await,
            suggested_number,
        };

        match self.registry.register(&registration).await {
            Ok(outcome) => {
                let identity = DeviceIdentity {
                    device_id,
                    device_number: outcome.device_number,
                    lab_id: Some(lab_id),
                    free_mode: outcome.free_mode,
                };
                self.file.write(&identity).await?;
                info!(
                    "Device {} registered in lab {} as {:?} from {}",
                    device_id, lab_id, identity.device_number, registration.ip
                );
                Ok(identity)
            }
            Err(e) if e.is_unavailable() => match stored {
                Some(identity) if identity.is_registered_in(lab_id) => {
                    warn!("Registry unreachable ({}), keeping stored binding", e);
                    Ok(identity)
                }
                _ => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// The stored identity, if any
    pub async fn persisted(&self) -> Option<DeviceIdentity> {
        self.file.read().await
    }

    /// Lab and device number a new session is bound to
    ///
    /// Free-mode labs hand out no numbers, so the configured suggestion is used.
    pub async fn session_binding(&self) -> KioskResult<(i32, i32)> {
        let identity = self.persisted().await.ok_or(KioskError::DeviceNotRegistered)?;
        self.binding_for(&identity)
    }

    /// Fails when sessions could never be opened from `identity`
    pub fn check_bindable(&self, identity: &DeviceIdentity) -> KioskResult<()> {
        self.binding_for(identity).map(|_| ())
    }

    fn binding_for(&self, identity: &DeviceIdentity) -> KioskResult<(i32, i32)> {
        let lab_id = identity.lab_id.ok_or(KioskError::DeviceNotRegistered)?;
        match identity.device_number.or(self.suggested_number) {
            Some(number) => Ok((lab_id, number)),
            None if identity.free_mode => Err(KioskError::DeviceNumberRequired(lab_id)),
            None => Err(KioskError::DeviceNotRegistered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteResult};
    use async_trait::async_trait;
    use booking::models::RegistrationOutcome;
    use std::sync::Mutex;

    /// Registry handing out `number`, or failing with `error` when set
    struct FakeRegistry {
        number: Option<i32>,
        error: Mutex<Option<RemoteError>>,
        calls: Mutex<Vec<DeviceRegistration>>,
    }

    impl FakeRegistry {
        fn answering(number: Option<i32>) -> Arc<Self> {
            Arc::new(Self {
                number,
                error: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn fail_with(&self, error: RemoteError) {
            *self.error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn register(
            &self,
            registration: &DeviceRegistration,
        ) -> RemoteResult<RegistrationOutcome> {
            self.calls.lock().unwrap().push(registration.clone());
            if let Some(error) = self.error.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(RegistrationOutcome {
                device_number: self.number,
                free_mode: self.number.is_none(),
            })
        }
    }

    fn registry(dir: &tempfile::TempDir, fake: Arc<FakeRegistry>) -> DeviceRegistry {
        DeviceRegistry::new(
            JsonFile::new(dir.path().join("device.json")),
            fake,
            "http://127.0.0.1:3001",
            Some(12),
        )
    }

    #[tokio::test]
    async fn test_device_id_is_generated_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, FakeRegistry::answering(Some(4)));

        let first = registry.ensure_device_id().await.unwrap();
        let second = registry.ensure_device_id().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_registration_stores_number_and_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeRegistry::answering(Some(4));
        let registry = registry(&dir, fake.clone());

        let first = registry.ensure_registered(1).await.unwrap();
        let second = registry.ensure_registered(1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.device_number, Some(4));
        assert_eq!(registry.session_binding().await.unwrap(), (1, 4));

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0].suggested_number, Some(12));
        assert_eq!(calls[1].suggested_number, Some(4));
        assert_eq!(calls[0].device_id, calls[1].device_id);
    }

    #[tokio::test]
    async fn test_offline_boot_keeps_stored_binding() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeRegistry::answering(Some(4));
        let registry = registry(&dir, fake.clone());
        let online = registry.ensure_registered(1).await.unwrap();

        fake.fail_with(RemoteError::Unavailable("timeout".into()));
        assert_eq!(registry.ensure_registered(1).await.unwrap(), online);

        // no binding for another lab to fall back on
        assert!(matches!(
            registry.ensure_registered(2).await,
            Err(KioskError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_not_masked_by_stored_binding() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeRegistry::answering(Some(4));
        let registry = registry(&dir, fake.clone());
        registry.ensure_registered(1).await.unwrap();

        fake.fail_with(RemoteError::Rejected {
            status: 409,
            message: "lab 1 has no free device number".into(),
        });
        assert!(matches!(
            registry.ensure_registered(1).await,
            Err(KioskError::UpstreamRejected { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn test_free_mode_binds_suggested_number() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, FakeRegistry::answering(None));

        let identity = registry.ensure_registered(3).await.unwrap();
        assert!(identity.free_mode);
        assert_eq!(identity.device_number, None);
        assert_eq!(registry.session_binding().await.unwrap(), (3, 12));
    }

    #[tokio::test]
    async fn test_free_mode_without_configured_number_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DeviceRegistry::new(
            JsonFile::new(dir.path().join("device.json")),
            FakeRegistry::answering(None),
            "http://127.0.0.1:3001",
            None,
        );

        let identity = registry.ensure_registered(3).await.unwrap();
        assert!(identity.free_mode);
        assert!(matches!(
            registry.check_bindable(&identity),
            Err(KioskError::DeviceNumberRequired(3))
        ));
        assert!(matches!(
            registry.session_binding().await,
            Err(KioskError::DeviceNumberRequired(3))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_device_has_no_binding() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, FakeRegistry::answering(Some(4)));
        registry.ensure_device_id().await.unwrap();

        assert!(matches!(
            registry.session_binding().await,
            Err(KioskError::DeviceNotRegistered)
        ));
    }
}
