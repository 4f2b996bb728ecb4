//! Clients for the services a kiosk talks to
//!
//! Each concern sits behind its own trait so the session manager and the
//! device registry can run against fakes. [`HttpBackend`] implements all of
//! them over HTTP with [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use booking::models::{DeviceRegistration, RegistrationOutcome, Reservation, SessionRecord};
use chrono::NaiveDate;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connect or timeout failure, or a 5xx answer
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            RemoteError::Decode(error.to_string())
        } else {
            RemoteError::Unavailable(error.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Exchange credentials for a bearer token
    async fn authenticate(&self, rut: &str, password: &str) -> RemoteResult<String>;
}

#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn start_session(
        &self,
        token: &str,
        lab_id: i32,
        device_number: i32,
    ) -> RemoteResult<SessionRecord>;

    async fn end_session(&self, token: &str, session_id: Uuid, reason: &str) -> RemoteResult<()>;

    /// Heartbeat; `Ok(false)` is a definitive answer that the session is over
    async fn is_active(&self, session_id: Uuid) -> RemoteResult<bool>;
}

#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn register(&self, registration: &DeviceRegistration)
    -> RemoteResult<RegistrationOutcome>;
}

#[async_trait]
pub trait ReservationFeed: Send + Sync {
    async fn reservations(&self, lab_id: i32, date: NaiveDate) -> RemoteResult<Vec<Reservation>>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct Liveness {
    active: bool,
}

/// HTTP client for the reservation API and the authentication service
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
    auth_url: String,
}

impl HttpBackend {
    pub fn new(api_url: &str, auth_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            auth_url: auth_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Whether the reservation API answers its health check
    pub async fn ping(&self) -> RemoteResult<()> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);

        if status.is_server_error() {
            Err(RemoteError::Unavailable(format!("{}: {}", status, message)))
        } else {
            Err(RemoteError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }

    async fn parse_response<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthClient for HttpBackend {
    async fn authenticate(&self, rut: &str, password: &str) -> RemoteResult<String> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.auth_url))
            .json(&json!({ "rut": rut, "password": password }))
            .send()
            .await?;

        let token: TokenResponse = Self::parse_response(response).await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl SessionClient for HttpBackend {
    async fn start_session(
        &self,
        token: &str,
        lab_id: i32,
        device_number: i32,
    ) -> RemoteResult<SessionRecord> {
        let response = self
            .client
            .post(format!("{}/sessions", self.api_url))
            .bearer_auth(token)
            .json(&json!({ "lab_id": lab_id, "device_number": device_number }))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn end_session(&self, token: &str, session_id: Uuid, reason: &str) -> RemoteResult<()> {
        let response = self
            .client
            .post(format!("{}/sessions/{}/end", self.api_url, session_id))
            .bearer_auth(token)
            .json(&json!({ "reason": reason }))
            .send()
            .await?;

        Self::check_status(response).await.map(|_| ())
    }

    async fn is_active(&self, session_id: Uuid) -> RemoteResult<bool> {
        let response = self
            .client
            .get(format!("{}/sessions/{}/heartbeat", self.api_url, session_id))
            .send()
            .await?;

        // the server forgot the session, which ends it just as surely
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let liveness: Liveness = Self::parse_response(response).await?;
        Ok(liveness.active)
    }
}

#[async_trait]
impl RegistryClient for HttpBackend {
    async fn register(
        &self,
        registration: &DeviceRegistration,
    ) -> RemoteResult<RegistrationOutcome> {
        let response = self
            .client
            .post(format!("{}/devices/register", self.api_url))
            .json(registration)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[async_trait]
impl ReservationFeed for HttpBackend {
    async fn reservations(&self, lab_id: i32, date: NaiveDate) -> RemoteResult<Vec<Reservation>> {
        let response = self
            .client
            .get(format!("{}/reservations", self.api_url))
            .query(&[("date", date.to_string()), ("lab_id", lab_id.to_string())])
            .send()
            .await?;

        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        // nothing listens on the discard port
        let backend = HttpBackend::new(
            "http://127.0.0.1:9",
            "http://127.0.0.1:9",
            Duration::from_millis(500),
        )
        .unwrap();

        let error = backend.is_active(Uuid::new_v4()).await.unwrap_err();
        assert!(error.is_unavailable(), "{error:?}");
        assert!(backend.ping().await.unwrap_err().is_unavailable());
    }

    #[test]
    fn test_trailing_slashes_are_dropped() {
        let backend = HttpBackend::new(
            "http://localhost:3001/",
            "http://localhost:3000/",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(backend.api_url(), "http://localhost:3001");
    }
}
