//! Device-local RPC for the kiosk UI
//!
//! Served on a loopback address only. Session notifications are pushed over
//! server-sent events on `/events`.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use crate::{
    device::DeviceRegistry,
    error::KioskResult,
    session::SessionManager,
    subscription::{NetworkStatus, ReservationSnapshot},
};

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct KioskState {
    pub sessions: Arc<SessionManager>,
    pub device: Arc<DeviceRegistry>,
    pub lab_id: i32,
    pub network: watch::Receiver<NetworkStatus>,
    pub reservations: watch::Receiver<ReservationSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub rut: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub rut: String,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    pub session_id: Uuid,
    #[serde(default = "default_end_reason")]
    pub reason: String,
}

fn default_end_reason() -> String {
    "logout".to_string()
}

pub fn create_router(state: KioskState) -> Router {
    Router::new()
        .route("/device", get(get_device))
        .route("/device/ensure-registered", post(ensure_registered))
        .route("/session/login", post(login))
        .route("/session/authenticate", post(authenticate))
        .route("/session/start", post(start_session))
        .route("/session/end", post(end_session))
        .route(
            "/session/persisted",
            get(read_persisted).delete(clear_persisted),
        )
        .route("/session/offline-use", post(allow_offline_use))
        .route("/session/kiosk-mode", post(restore_kiosk))
        .route("/window/close-requested", post(close_requested))
        .route("/status", get(status))
        .route("/reservations", get(reservations))
        .route("/events", get(events))
        .with_state(state)
}

async fn ensure_registered(State(state): State<KioskState>) -> KioskResult<impl IntoResponse> {
    Ok(Json(state.device.ensure_registered(state.lab_id).await?))
}

async fn get_device(State(state): State<KioskState>) -> impl IntoResponse {
    match state.device.persisted().await {
        Some(identity) => Json(identity).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "device has no identity yet" })),
        )
            .into_response(),
    }
}

async fn login(
    State(state): State<KioskState>,
    Json(payload): Json<LoginRequest>,
) -> KioskResult<impl IntoResponse> {
    Ok(Json(
        state.sessions.login(&payload.rut, &payload.password).await?,
    ))
}

async fn authenticate(
    State(state): State<KioskState>,
    Json(payload): Json<LoginRequest>,
) -> KioskResult<impl IntoResponse> {
    Ok(Json(
        state
            .sessions
            .authenticate(&payload.rut, &payload.password)
            .await?,
    ))
}

async fn start_session(
    State(state): State<KioskState>,
    Json(payload): Json<StartRequest>,
) -> KioskResult<impl IntoResponse> {
    Ok(Json(state.sessions.start(&payload.rut).await?))
}

async fn end_session(
    State(state): State<KioskState>,
    Json(payload): Json<EndRequest>,
) -> KioskResult<impl IntoResponse> {
    Ok(Json(
        state
            .sessions
            .finalize(payload.session_id, &payload.reason)
            .await?,
    ))
}

async fn read_persisted(State(state): State<KioskState>) -> impl IntoResponse {
    Json(state.sessions.read_persisted().await)
}

async fn clear_persisted(State(state): State<KioskState>) -> KioskResult<impl IntoResponse> {
    state.sessions.clear_persisted().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn allow_offline_use(State(state): State<KioskState>) -> KioskResult<impl IntoResponse> {
    Ok(Json(state.sessions.allow_offline_use().await?))
}

async fn restore_kiosk(State(state): State<KioskState>) -> KioskResult<impl IntoResponse> {
    Ok(Json(state.sessions.restore_kiosk().await?))
}

async fn close_requested(State(state): State<KioskState>) -> impl IntoResponse {
    Json(json!({ "action": state.sessions.close_requested().await }))
}

async fn status(State(state): State<KioskState>) -> impl IntoResponse {
    let network = state.network.borrow().clone();
    Json(json!({
        "lab_id": state.lab_id,
        "session": state.sessions.snapshot().await,
        "device": state.device.persisted().await,
        "network": network,
    }))
}

async fn reservations(State(state): State<KioskState>) -> impl IntoResponse {
    let snapshot = state.reservations.borrow().clone();
    Json(snapshot)
}

async fn events(
    State(state): State<KioskState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.sessions.subscribe()).filter_map(|received| async move {
        let event = match received {
            Ok(event) => event,
            Err(e) => {
                warn!("Event subscriber fell behind: {}", e);
                return None;
            }
        };
        match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                warn!("Could not encode {}: {}", event.name(), e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default().interval(KEEP_ALIVE))
}
