// rest_api/src/lib.rs
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use anyhow::{Context, Error as AnyhowError};

use models::errors::CoreError;
use models::{
    Appointment, AppointmentFilter, AppointmentStatus, Availability, BookingRequest,
    DecisionOutcome, DepartmentUpdate, DoctorFilter, NewDepartment, NewDoctor, ProfileUpdate,
};
use notifications_service::ChangeFeed;
use scheduler::SchedulingEngine;
use security::Caller;
use storage::{SchedulingStore, StoreConfig};

pub mod config;
pub use crate::config::{RestApiConfig, load_rest_api_config, load_storage_config};

/// Errors produced by the HTTP layer. Core errors keep their kind; anything
/// unexpected is surfaced as an opaque internal error and logged.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Anyhow(#[from] AnyhowError),
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
        CoreError::Forbidden(_) | CoreError::ProfileIncomplete => StatusCode::FORBIDDEN,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidSlot(_) | CoreError::InvalidData(_) | CoreError::Serialization(_) => {
            StatusCode::BAD_REQUEST
        }
        CoreError::SlotTaken | CoreError::InvalidTransition { .. } | CoreError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Core(err) => (status_for(err), err.to_string()),
            ApiError::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("IO error: {}", err),
            ),
            ApiError::Anyhow(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("internal error: {:#}", err),
            ),
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", message);
        }
        let body = Json(json!({
            "status": "error",
            "message": message,
        }));
        (status, body).into_response()
    }
}

/// Shared state for the axum application.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<SchedulingEngine>,
}

impl AppState {
    pub fn new(engine: Arc<SchedulingEngine>) -> Self {
        AppState { engine }
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|hv| hv.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .ok_or(CoreError::Unauthenticated)?;
    Ok(security::resolve(token, state.engine.store())?)
}

// --- Request payloads -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BookAppointmentBody {
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub patient_note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecideBody {
    pub outcome: DecisionOutcome,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityWindowBody {
    pub weekday: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    pub status: Option<AppointmentStatus>,
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
}

impl AppointmentQuery {
    fn into_filter(self) -> AppointmentFilter {
        AppointmentFilter {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            status: self.status,
            date: self.date,
        }
    }
}

// --- Handlers ---------------------------------------------------------------

async fn health_check_handler() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "message": "Scheduling API is healthy" })),
    )
}

async fn version_handler() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "version": env!("CARGO_PKG_VERSION"), "api_level": 1 })),
    )
}

async fn list_departments_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let departments = state.engine.list_departments().await?;
    Ok(Json(json!({ "departments": departments })))
}

async fn create_department_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewDepartment>,
) -> Result<Response, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let department = state.engine.create_department(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(department)).into_response())
}

async fn update_department_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<DepartmentUpdate>,
) -> Result<Json<models::Department>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.update_department(&caller, id, payload).await?))
}

async fn list_doctors_handler(
    State(state): State<AppState>,
    Query(filter): Query<DoctorFilter>,
) -> Result<Json<Value>, ApiError> {
    let doctors = state.engine.list_doctors(filter).await?;
    Ok(Json(json!({ "doctors": doctors })))
}

async fn get_doctor_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<models::Doctor>, ApiError> {
    Ok(Json(state.engine.get_doctor(id).await?))
}

async fn create_doctor_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewDoctor>,
) -> Result<Response, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let doctor = state.engine.create_doctor(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(doctor)).into_response())
}

async fn list_availability_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let windows = state.engine.list_availability(id).await?;
    Ok(Json(json!({ "availability": windows })))
}

async fn put_availability_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<Vec<AvailabilityWindowBody>>,
) -> Result<Json<Value>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let windows: Vec<Availability> = payload
        .into_iter()
        .map(|w| Availability::new(id, w.weekday, w.start_time, w.end_time))
        .collect();
    let stored = state.engine.set_availability(&caller, id, windows).await?;
    Ok(Json(json!({ "availability": stored })))
}

async fn get_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<models::Profile>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.get_profile(&caller, id).await?))
}

async fn update_profile_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<models::Profile>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.update_profile(&caller, id, payload).await?))
}

async fn list_appointments_handler(
    State(state): State<AppState>,
    Query(query): Query<AppointmentQuery>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let appointments = state
        .engine
        .list_appointments(&caller, query.into_filter())
        .await?;
    Ok(Json(json!({ "appointments": appointments })))
}

async fn create_appointment_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BookAppointmentBody>,
) -> Result<Response, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let request = BookingRequest {
        patient_id: caller.profile_id,
        doctor_id: payload.doctor_id,
        appointment_date: payload.appointment_date,
        appointment_time: payload.appointment_time,
        patient_note: payload.patient_note,
    };
    let appointment = state.engine.create_appointment(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(appointment)).into_response())
}

async fn get_appointment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Appointment>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.get_appointment(&caller, id).await?))
}

async fn decide_appointment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<DecideBody>,
) -> Result<Json<Appointment>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(
        state
            .engine
            .decide(&caller, id, payload.outcome, payload.note)
            .await?,
    ))
}

async fn cancel_appointment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Appointment>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.cancel(&caller, id).await?))
}

async fn complete_appointment_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<Appointment>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    Ok(Json(state.engine.complete(&caller, id).await?))
}

/// Builds the full API router over the given state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/api/v1/health", get(health_check_handler))
        .route("/api/v1/version", get(version_handler))
        .route(
            "/api/v1/departments",
            get(list_departments_handler).post(create_department_handler),
        )
        .route("/api/v1/departments/:id", put(update_department_handler))
        .route(
            "/api/v1/doctors",
            get(list_doctors_handler).post(create_doctor_handler),
        )
        .route("/api/v1/doctors/:id", get(get_doctor_handler))
        .route(
            "/api/v1/doctors/:id/availability",
            get(list_availability_handler).put(put_availability_handler),
        )
        .route(
            "/api/v1/profiles/:id",
            get(get_profile_handler).put(update_profile_handler),
        )
        .route(
            "/api/v1/appointments",
            get(list_appointments_handler).post(create_appointment_handler),
        )
        .route("/api/v1/appointments/:id", get(get_appointment_handler))
        .route(
            "/api/v1/appointments/:id/decide",
            post(decide_appointment_handler),
        )
        .route(
            "/api/v1/appointments/:id/cancel",
            post(cancel_appointment_handler),
        )
        .route(
            "/api/v1/appointments/:id/complete",
            post(complete_appointment_handler),
        )
        .with_state(state)
        .layer(cors)
}

/// Opens the store, wires the engine and serves the API until the shutdown
/// signal fires.
pub async fn start_server(
    api_config: RestApiConfig,
    store_config: StoreConfig,
    shutdown_rx: oneshot::Receiver<()>,
) -> Result<(), AnyhowError> {
    let store = Arc::new(SchedulingStore::open(&store_config)?);
    let engine = Arc::new(SchedulingEngine::new(store, ChangeFeed::default()));
    let app = router(AppState::new(engine));

    let addr = format!("{}:{}", api_config.host, api_config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to address: {}", addr))?;
    tracing::info!("Scheduling API server listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
            tracing::info!("Received shutdown signal");
        })
        .await
        .context("API server failed to start or run")?;

    tracing::info!("Scheduling API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::AppointmentStatus;

    #[test]
    fn core_errors_map_to_the_documented_status_codes() {
        assert_eq!(status_for(&CoreError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&CoreError::Forbidden("nope".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(&CoreError::ProfileIncomplete), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&CoreError::NotFound("appointment")), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&CoreError::InvalidSlot("past".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&CoreError::SlotTaken), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&CoreError::InvalidTransition {
                from: AppointmentStatus::Cancelled,
                to: AppointmentStatus::Confirmed,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&CoreError::Storage("disk on fire".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
