use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::model::*;

use super::dto::{AvailabilityQuery, AvailabilityResponse, HealthResponse};
use super::error::AppError;
use super::extract::{FilterQuery, IdPath, JsonBody, QueryParams};
use super::state::AppState;

pub type HandlerResult<T> = Result<Json<T>, AppError>;

// ── Generic CRUD ─────────────────────────────────────────

/// `GET /<kind>`: query parameters are an equality filter over JSON field names.
pub async fn list<E: Entity>(
    State(state): State<AppState>,
    FilterQuery(filter): FilterQuery,
) -> HandlerResult<Vec<E>> {
    Ok(Json(state.service.list::<E>(&filter).await?))
}

pub async fn get<E: Entity>(State(state): State<AppState>, IdPath(id): IdPath) -> HandlerResult<E> {
    Ok(Json(state.service.get::<E>(id).await?))
}

pub async fn create<E: Entity>(
    State(state): State<AppState>,
    JsonBody(entity): JsonBody<E>,
) -> Result<(StatusCode, Json<E>), AppError> {
    let created = state.service.create(entity).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update<E: Entity>(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    JsonBody(patch): JsonBody<E::Patch>,
) -> HandlerResult<E> {
    Ok(Json(state.service.update::<E>(id, patch).await?))
}

/// Deletes of beds, services and establishments are refused while dependents remain.
pub async fn delete<E: Entity>(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<StatusCode, AppError> {
    state.service.delete(E::KIND, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Reservations ─────────────────────────────────────────

/// `POST /reservations`
pub async fn create_reservation(
    State(state): State<AppState>,
    JsonBody(reservation): JsonBody<Reservation>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let created = state.service.create_reservation(reservation).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PATCH /reservations/{id}`. An unknown id is a 400 here, not a 404.
pub async fn update_reservation(
    State(state): State<AppState>,
    IdPath(id): IdPath,
    JsonBody(patch): JsonBody<ReservationPatch>,
) -> HandlerResult<Reservation> {
    let updated = state
        .service
        .update_reservation(id, patch)
        .await
        .map_err(|e| AppError::from(e).missing_is_bad_request())?;
    Ok(Json(updated))
}

/// `GET /beds/{id}/availability`
pub async fn bed_availability(
    State(state): State<AppState>,
    IdPath(bed_id): IdPath,
    QueryParams(query): QueryParams<AvailabilityQuery>,
) -> HandlerResult<AvailabilityResponse> {
    let available = state
        .service
        .check_availability(bed_id, query.window(), query.exclude_reservation_id)
        .await?;
    Ok(Json(AvailabilityResponse { bed_id, available }))
}

// ── Health ───────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, store) = match state.service.health().await {
        Ok(()) => ("ok", "ok".to_string()),
        Err(e) => ("degraded", e.to_string()),
    };
    Json(HealthResponse {
        status: status.into(),
        store,
    })
}
