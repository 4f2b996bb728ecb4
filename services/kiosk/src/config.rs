//! Kiosk configuration
//!
//! Read from an optional `kiosk.toml` and `KIOSK_`-prefixed environment
//! variables, e.g. `KIOSK_LAB_ID=2` or `KIOSK_BACKEND_URL=http://10.0.0.1:3001`.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use config::{Config, ConfigError};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct KioskConfig {
    /// Base URL of the reservation API
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Base URL of the authentication service
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_lab_id")]
    pub lab_id: i32,
    /// Directory holding the device and session files
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Device-local RPC address; must be a loopback address
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,
    /// Number asked for at registration, and used in free-mode labs
    #[serde(default)]
    pub suggested_number: Option<i32>,
    #[serde(default = "default_utc_offset")]
    pub lab_utc_offset_minutes: i32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_reservation_poll")]
    pub reservation_poll_secs: u64,
    #[serde(default = "default_network_poll")]
    pub network_poll_secs: u64,
    #[serde(default = "default_heartbeat_poll")]
    pub heartbeat_poll_secs: u64,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:3001".to_string()
}

fn default_auth_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_lab_id() -> i32 {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("kiosk-state")
}

fn default_rpc_addr() -> String {
    "127.0.0.1:4100".to_string()
}

fn default_utc_offset() -> i32 {
    -180
}

fn default_request_timeout() -> u64 {
    5
}

fn default_reservation_poll() -> u64 {
    5
}

fn default_network_poll() -> u64 {
    12
}

fn default_heartbeat_poll() -> u64 {
    30
}

impl KioskConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("kiosk.toml").required(false))
            .add_source(config::Environment::with_prefix("KIOSK").try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let addr: SocketAddr = self.rpc_addr.parse().map_err(|e| {
            ConfigError::Message(format!("KIOSK_RPC_ADDR '{}': {}", self.rpc_addr, e))
        })?;
        if !addr.ip().is_loopback() {
            return Err(ConfigError::Message(format!(
                "KIOSK_RPC_ADDR must be a loopback address, got {}",
                addr
            )));
        }
        if [
            self.request_timeout_secs,
            self.reservation_poll_secs,
            self.network_poll_secs,
            self.heartbeat_poll_secs,
        ]
        .contains(&0)
        {
            return Err(ConfigError::Message(
                "timeouts and poll periods must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn device_file(&self) -> PathBuf {
        self.state_dir.join("device.json")
    }

    pub fn session_file(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reservation_poll(&self) -> Duration {
        Duration::from_secs(self.reservation_poll_secs)
    }

    pub fn network_poll(&self) -> Duration {
        Duration::from_secs(self.network_poll_secs)
    }

    pub fn heartbeat_poll(&self) -> Duration {
        Duration::from_secs(self.heartbeat_poll_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "KIOSK_LAB_ID",
        "KIOSK_RPC_ADDR",
        "KIOSK_SUGGESTED_NUMBER",
        "KIOSK_NETWORK_POLL_SECS",
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
        let config = KioskConfig::load().unwrap();
        assert_eq!(config.lab_id, 1);
        assert_eq!(config.rpc_addr, "127.0.0.1:4100");
        assert_eq!(config.suggested_number, None);
        assert_eq!(config.reservation_poll(), Duration::from_secs(5));
        assert_eq!(config.network_poll(), Duration::from_secs(12));
        assert_eq!(config.heartbeat_poll(), Duration::from_secs(30));
        assert_eq!(config.session_file(), PathBuf::from("kiosk-state/session.json"));
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        clear();
        unsafe {
            std::env::set_var("KIOSK_LAB_ID", "3");
            std::env::set_var("KIOSK_SUGGESTED_NUMBER", "17");
        }
        let config = KioskConfig::load().unwrap();
        assert_eq!(config.lab_id, 3);
        assert_eq!(config.suggested_number, Some(17));
        clear();
    }

    #[test]
    #[serial]
    fn test_rpc_must_stay_on_loopback() {
        clear();
        unsafe { std::env::set_var("KIOSK_RPC_ADDR", "0.0.0.0:4100") };
        assert!(KioskConfig::load().is_err());
        clear();
    }

    #[test]
    #[serial]
    fn test_rejects_zero_poll_period() {
        clear();
        unsafe { std::env::set_var("KIOSK_NETWORK_POLL_SECS", "0") };
        assert!(KioskConfig::load().is_err());
        clear();
    }
}
