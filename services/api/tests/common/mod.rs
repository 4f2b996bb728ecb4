#![allow(dead_code)]

use std::sync::Arc;

use api::{AppState, middleware::{Claims, JwtKeys}, repositories::Stores, routes};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, Response, header},
};
use booking::{FixedClock, LabTimezone, MemoryStore, models::Lab};
use chrono::{TimeZone, Utc};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::Value;
use tower::ServiceExt;

pub const SECRET: &[u8] = b"test-secret";
pub const STUDENT: &str = "12.345.678-5";
pub const OTHER_STUDENT: &str = "9.876.543-3";
pub const STAFF: &str = "11.111.111-1";

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub clock: FixedClock,
}

/// Router over a memory store holding lab 1 with 40 PCs; 06:00 lab time on 2025-03-10
pub async fn build_test_app() -> TestApp {
    let store = MemoryStore::with_labs([Lab {
        id: 1,
        name: "Laboratorio 1".to_string(),
        pc_count: 40,
        free_mode: false,
        standard_grid: false,
    }])
    .await;
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap());
    let timezone = LabTimezone::from_offset_minutes(-180).unwrap();

    let state = AppState::new(
        Stores::memory(store.clone()),
        Arc::new(clock.clone()),
        timezone,
        JwtKeys::hs256(SECRET),
    );

    TestApp {
        router: routes::create_router(state),
        store,
        clock,
    }
}

pub fn token(rut: &str, roles: &[&str]) -> String {
    let now = Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: rut.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iat: now,
        exp: now + 600,
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
