//! API service routes

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use axum_extra::extract::WithRejection;
use booking::{
    TimeWindow,
    models::{DeviceRegistration, NewReservation},
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    middleware::{AuthUser, auth_middleware, staff_only},
    models::{
        AvailabilityQuery, BitacoraQuery, CreateClassBlockRequest, CreateReservationRequest,
        DateQuery, EditReservationRequest, EndSessionRequest, FreeModeRequest, HeartbeatResponse,
        LabEvent, LabResponse, MaintenanceRequest, OccupancyQuery, RegisterDeviceRequest,
        StartSessionRequest,
    },
    state::AppState,
    validation::{validate_label, validate_rut},
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let staff_routes = Router::new()
        .route("/class-blocks", post(create_class_block))
        .route("/class-blocks/:block_id", delete(cancel_class_block))
        .route("/labs/:lab_id/pcs/:pc_id/maintenance", put(set_maintenance))
        .route("/labs/:lab_id/free-mode", put(set_free_mode))
        .route("/bitacora", get(get_bitacora))
        .route_layer(middleware::from_fn(staff_only))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let protected_routes = Router::new()
        .route("/reservations", post(create_reservation))
        .route(
            "/reservations/:id",
            get(get_reservation)
                .put(edit_reservation)
                .delete(cancel_reservation),
        )
        .route("/sessions", post(start_session))
        .route("/sessions/:id/end", post(end_session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/availability", get(check_availability))
        .route("/reservations", get(list_reservations))
        .route("/labs", get(list_labs))
        .route("/labs/:lab_id", get(get_lab))
        .route("/labs/:lab_id/occupancy", get(get_occupancy))
        .route("/labs/:lab_id/pcs/:pc_id/reservations", get(list_pc_reservations))
        .route("/devices/register", post(register_device))
        .route("/sessions/:id/heartbeat", get(heartbeat))
        .merge(protected_routes)
        .merge(staff_routes)
        .with_state(state)
}

fn parse_window(start: &str, end: &str) -> ApiResult<TimeWindow> {
    Ok(TimeWindow::parse(start, end)?)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let storage = match &state.db_pool {
        Some(pool) => {
            common::database::health_check(pool).await?;
            "postgres"
        }
        None => "memory",
    };

    Ok(Json(json!({
        "status": "ok",
        "service": "api",
        "storage": storage,
    })))
}

/// Whether a PC can take an individual booking
pub async fn check_availability(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<AvailabilityQuery>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let window = parse_window(&query.start, &query.end)?;
    let availability = state
        .engine
        .check_availability(query.lab_id, query.pc_id, query.date, window)
        .await?;

    Ok(Json(availability))
}

/// Active reservations of a day
pub async fn list_reservations(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<DateQuery>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let reservations = state.engine.list_by_date(query.date, query.lab_id).await?;
    Ok(Json(reservations))
}

pub async fn list_labs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.labs().await?))
}

/// A lab with the PCs currently under maintenance
pub async fn get_lab(
    State(state): State<AppState>,
    Path(lab_id): Path<i32>,
) -> ApiResult<impl IntoResponse> {
    let lab = state.engine.lab(lab_id).await?;
    let maintenance = state
        .engine
        .maintenance_marks(lab_id)
        .await?
        .into_iter()
        .map(|mark| mark.pc_id)
        .collect();

    Ok(Json(LabResponse { lab, maintenance }))
}

/// Per-PC occupancy map of a lab for one window
pub async fn get_occupancy(
    State(state): State<AppState>,
    Path(lab_id): Path<i32>,
    WithRejection(Query(query), _): WithRejection<Query<OccupancyQuery>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let window = parse_window(&query.start, &query.end)?;
    let occupancy = state
        .engine
        .pc_occupancy(lab_id, query.date, window)
        .await?;

    Ok(Json(occupancy))
}

pub async fn list_pc_reservations(
    State(state): State<AppState>,
    Path((lab_id, pc_id)): Path<(i32, i32)>,
    WithRejection(Query(query), _): WithRejection<Query<DateQuery>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let reservations = state.engine.list_by_pc(lab_id, pc_id, query.date).await?;
    Ok(Json(reservations))
}

/// Book a PC for the caller, or for someone else when the caller is staff
pub async fn create_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateReservationRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let subject_id = match payload.subject_id {
        Some(subject) if subject != user.rut && !user.is_staff() => {
            return Err(ApiError::Forbidden(
                "only staff may book on behalf of someone else".to_string(),
            ));
        }
        Some(subject) => subject,
        None => user.rut.clone(),
    };
    validate_rut(&subject_id).map_err(ApiError::BadRequest)?;
    if let Some(activity) = &payload.activity {
        validate_label("activity", activity).map_err(ApiError::BadRequest)?;
    }

    let request = NewReservation::individual(
        subject_id,
        payload.lab_id,
        payload.pc_id,
        payload.date,
        payload.window,
    )
    .with_activity(payload.activity);

    let reservation = state.engine.create_reservation(request).await?;
    state
        .publish(
            reservation.lab_id,
            LabEvent::ReservationCreated {
                reservation_id: reservation.id,
                pc_id: reservation.pc_id,
                date: reservation.date,
            },
        )
        .await;

    Ok((StatusCode::CREATED, Json(reservation)))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.get_reservation(id).await?))
}

/// Move a reservation to a new window; owner or staff only
pub async fn edit_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    WithRejection(Json(payload), _): WithRejection<Json<EditReservationRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let current = state.engine.get_reservation(id).await?;
    if !user.can_manage(&current.subject_id) {
        return Err(ApiError::Forbidden(format!(
            "reservation {} belongs to someone else",
            id
        )));
    }

    let reservation = state.engine.edit_reservation(id, payload.window).await?;
    state
        .publish(
            reservation.lab_id,
            LabEvent::ReservationUpdated {
                reservation_id: reservation.id,
                pc_id: reservation.pc_id,
                date: reservation.date,
            },
        )
        .await;

    Ok(Json(reservation))
}

/// Cancel a reservation; repeating the call succeeds
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let current = state.engine.get_reservation(id).await?;
    if !user.can_manage(&current.subject_id) {
        return Err(ApiError::Forbidden(format!(
            "reservation {} belongs to someone else",
            id
        )));
    }

    let reservation = state.engine.cancel_reservation(id).await?;
    if current.is_active() {
        state
            .publish(
                reservation.lab_id,
                LabEvent::ReservationCancelled {
                    reservation_id: reservation.id,
                    pc_id: reservation.pc_id,
                    date: reservation.date,
                },
            )
            .await;
    }

    Ok(Json(reservation))
}

/// Book every PC of a lab for a class
pub async fn create_class_block(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(payload), _): WithRejection<Json<CreateClassBlockRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    validate_label("title", &payload.title).map_err(ApiError::BadRequest)?;

    let outcome = state
        .engine
        .create_class_block(
            payload.lab_id,
            payload.date,
            payload.window,
            payload.title.trim(),
            &user.rut,
            payload.mode,
        )
        .await?;

    state
        .publish(
            payload.lab_id,
            LabEvent::ClassBlockCreated {
                block_id: outcome.block_id,
                date: payload.date,
                created: outcome.created.len(),
                failed: outcome.failure_count(),
            },
        )
        .await;

    let status = if outcome.is_complete() {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(outcome)))
}

pub async fn cancel_class_block(
    State(state): State<AppState>,
    Path(block_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let cancelled = state.engine.cancel_class_block(block_id).await?;

    if let Some(first) = cancelled.first() {
        state
            .publish(
                first.lab_id,
                LabEvent::ClassBlockCancelled {
                    block_id,
                    cancelled: cancelled.len(),
                },
            )
            .await;
    }

    Ok(Json(json!({
        "block_id": block_id,
        "cancelled": cancelled.len(),
    })))
}

/// Put a PC under maintenance or release it
pub async fn set_maintenance(
    State(state): State<AppState>,
    Path((lab_id, pc_id)): Path<(i32, i32)>,
    WithRejection(Json(payload), _): WithRejection<Json<MaintenanceRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let mark = state
        .engine
        .set_maintenance(lab_id, pc_id, payload.on)
        .await?;

    state
        .publish(
            lab_id,
            LabEvent::MaintenanceChanged {
                pc_id,
                on: payload.on,
            },
        )
        .await;

    Ok(Json(json!({
        "lab_id": lab_id,
        "pc_id": pc_id,
        "under_maintenance": payload.on,
        "since": mark.map(|m| m.since),
    })))
}

pub async fn set_free_mode(
    State(state): State<AppState>,
    Path(lab_id): Path<i32>,
    WithRejection(Json(payload), _): WithRejection<Json<FreeModeRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let lab = state.engine.set_free_mode(lab_id, payload.free_mode).await?;

    state
        .publish(
            lab_id,
            LabEvent::FreeModeChanged {
                free_mode: lab.free_mode,
            },
        )
        .await;

    Ok(Json(lab))
}

/// Attendance ledger for a date range
pub async fn get_bitacora(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<BitacoraQuery>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let rows = state
        .assembler
        .assemble(query.from, query.to, query.lab_id)
        .await?;

    Ok(Json(rows))
}

/// Register a kiosk and hand out its device number
pub async fn register_device(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<RegisterDeviceRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    if payload.hostname.trim().is_empty() || payload.ip.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "ip and hostname are required".to_string(),
        ));
    }

    let outcome = state
        .registrar
        .register(DeviceRegistration {
            device_id: payload.device_id,
            lab_id: payload.lab_id,
            ip: payload.ip,
            hostname: payload.hostname,
            suggested_number: payload.suggested_number,
        })
        .await?;

    Ok(Json(outcome))
}

/// Open a kiosk session for the caller on a device
pub async fn start_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    WithRejection(Json(payload), _): WithRejection<Json<StartSessionRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let lab = state.engine.lab(payload.lab_id).await?;
    if !lab.has_pc(payload.device_number) {
        return Err(ApiError::BadRequest(format!(
            "lab {} has no device number {}",
            lab.id, payload.device_number
        )));
    }

    let session = state
        .sessions
        .start_session(
            &user.rut,
            payload.lab_id,
            payload.device_number,
            state.clock.now(),
        )
        .await?;

    tracing::info!(
        "Session {} started for {} on lab {} device {}",
        session.session_id,
        session.subject_id,
        session.lab_id,
        session.device_number
    );
    Ok((StatusCode::CREATED, Json(session)))
}

/// End a session; owner or staff only, repeating the call succeeds
pub async fn end_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    WithRejection(Json(payload), _): WithRejection<Json<EndSessionRequest>, ApiError>,
) -> ApiResult<impl IntoResponse> {
    let current = state
        .sessions
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))?;
    if !user.can_manage(&current.subject_id) {
        return Err(ApiError::Forbidden(format!(
            "session {} belongs to someone else",
            id
        )));
    }

    let session = state
        .sessions
        .end_session(id, &payload.reason, state.clock.now())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))?;

    tracing::info!(
        "Session {} ended ({})",
        id,
        session.end_reason.as_deref().unwrap_or("unknown")
    );
    Ok(Json(session))
}

/// Heartbeat: touches the session and reports whether it is still active
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .sessions
        .heartbeat(id, state.clock.now())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("session {} not found", id)))?;

    Ok(Json(HeartbeatResponse::from(&session)))
}
