use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::CurrentParty,
    error::AppError,
    models::safety::{SafetyCheck, SuspicionKind},
    services::safety::ArmOutcome,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id/safety/suspicion", post(signal_suspicion))
        .route("/:id/safety/confirm", post(confirm_safe))
}

#[derive(Debug, Deserialize)]
struct SuspicionForm {
    reason: SuspicionKind,
}

async fn signal_suspicion(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
    Json(form): Json<SuspicionForm>,
) -> Result<Json<ArmOutcome>, AppError> {
    current.require_system()?;
    Ok(Json(state.safety.signal_suspicion(trip_id, form.reason).await?))
}

async fn confirm_safe(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<SafetyCheck>, AppError> {
    let rider = current.require_rider()?;
    Ok(Json(state.safety.confirm_safe(trip_id, rider).await?))
}
