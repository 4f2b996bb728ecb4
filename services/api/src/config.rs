//! Service configuration
//!
//! Read from an optional `api.toml` and `LABRES_`-prefixed environment
//! variables, e.g. `LABRES_BIND_ADDR=0.0.0.0:3001` or `LABRES_STORAGE=memory`.
//! Database, Redis and JWT settings keep their own unprefixed variables.

use config::{Config, ConfigError};
use serde::Deserialize;

/// Where reservations, sessions and devices are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process memory, for demos and tests; lost on restart
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Offset of the labs' wall clock from UTC
    #[serde(default = "default_utc_offset")]
    pub lab_utc_offset_minutes: i32,
    /// Publish lab events on Redis after each mutation
    #[serde(default)]
    pub publish_events: bool,
    /// Labs created at startup by the memory backend
    #[serde(default = "default_memory_labs")]
    pub memory_labs: i32,
    #[serde(default = "default_memory_pcs")]
    pub memory_pcs_per_lab: i32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_utc_offset() -> i32 {
    -180
}

fn default_memory_labs() -> i32 {
    1
}

fn default_memory_pcs() -> i32 {
    40
}

impl ApiConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("api.toml").required(false))
            .add_source(config::Environment::with_prefix("LABRES").try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;

        if !(-14 * 60..=14 * 60).contains(&config.lab_utc_offset_minutes) {
            return Err(ConfigError::Message(format!(
                "LABRES_LAB_UTC_OFFSET_MINUTES out of range: {}",
                config.lab_utc_offset_minutes
            )));
        }
        if config.memory_pcs_per_lab < 1 {
            return Err(ConfigError::Message(
                "LABRES_MEMORY_PCS_PER_LAB must be positive".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 3] = [
        "LABRES_STORAGE",
        "LABRES_LAB_UTC_OFFSET_MINUTES",
        "LABRES_BIND_ADDR",
    ];

    fn clear() {
        for var in VARS {
            // SAFETY: environment tests are serialised
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear();
        let config = ApiConfig::load().unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:3001");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.lab_utc_offset_minutes, -180);
        assert!(!config.publish_events);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear();
        unsafe {
            std::env::set_var("LABRES_STORAGE", "memory");
            std::env::set_var("LABRES_LAB_UTC_OFFSET_MINUTES", "-240");
        }
        let config = ApiConfig::load().unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.lab_utc_offset_minutes, -240);
        clear();
    }

    #[test]
    #[serial]
    fn test_rejects_impossible_offset() {
        clear();
        unsafe { std::env::set_var("LABRES_LAB_UTC_OFFSET_MINUTES", "5000") };
        assert!(ApiConfig::load().is_err());
        clear();
    }
}
