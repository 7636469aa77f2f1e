use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::CurrentParty,
    error::AppError,
    models::{fare::TripMeasure, split::SplitFareView, trip::Trip},
    services::{split::SplitRequest, trips::TripRequest},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(request_trip))
        .route("/:id", get(get_trip))
        .route("/:id/accept", post(accept_trip))
        .route("/:id/arrive", post(mark_arrived))
        .route("/:id/start", post(start_trip))
        .route("/:id/complete", post(complete_trip))
        .route("/:id/cancel", post(cancel_trip))
        .route("/:id/split", post(create_split))
}

async fn request_trip(
    State(state): State<AppState>,
    current: CurrentParty,
    Json(request): Json<TripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let rider = current.require_rider()?;
    let trip = state.trips.request_trip(rider, request).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    let viewer = current.require_party()?;
    Ok(Json(state.trips.get_trip(trip_id, viewer).await?))
}

async fn accept_trip(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    let driver = current.require_driver()?;
    Ok(Json(state.trips.accept_trip(trip_id, driver).await?))
}

async fn mark_arrived(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    let driver = current.require_driver()?;
    Ok(Json(state.trips.mark_arrived(trip_id, driver).await?))
}

async fn start_trip(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    let driver = current.require_driver()?;
    Ok(Json(state.trips.start_trip(trip_id, driver).await?))
}

async fn complete_trip(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
    Json(actual): Json<TripMeasure>,
) -> Result<Json<Trip>, AppError> {
    let driver = current.require_driver()?;
    Ok(Json(state.trips.complete_trip(trip_id, driver, actual).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CancelForm {
    #[serde(default)]
    reason: Option<String>,
}

async fn cancel_trip(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
    body: Option<Json<CancelForm>>,
) -> Result<Json<Trip>, AppError> {
    let actor = current.require_party()?;
    let reason = body.and_then(|Json(form)| form.reason).unwrap_or_default();
    Ok(Json(state.trips.cancel_trip(trip_id, actor, reason).await?))
}

#[derive(Debug, Deserialize)]
struct SplitForm {
    total: Decimal,
    #[serde(flatten)]
    request: SplitRequest,
}

async fn create_split(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
    Json(form): Json<SplitForm>,
) -> Result<(StatusCode, Json<SplitFareView>), AppError> {
    let initiator = current.require_rider()?;
    let split = state
        .splits
        .create_split(trip_id, initiator, form.total, form.request)
        .await?;
    Ok((StatusCode::CREATED, Json(split)))
}
