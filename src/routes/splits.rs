use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::CurrentParty,
    error::AppError,
    models::split::SplitFareView,
    services::split::SplitResponse,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_split))
        .route("/:id/cancel", post(cancel_split))
        .route("/:id/participants/:pid/respond", post(respond))
        .route("/:id/participants/:pid/pay", post(mark_paid))
}

async fn get_split(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(split_id): Path<Uuid>,
) -> Result<Json<SplitFareView>, AppError> {
    let viewer = current.require_party()?;
    Ok(Json(state.splits.get_split(split_id, viewer).await?))
}

async fn cancel_split(
    State(state): State<AppState>,
    current: CurrentParty,
    Path(split_id): Path<Uuid>,
) -> Result<Json<SplitFareView>, AppError> {
    let actor = current.require_party()?;
    Ok(Json(state.splits.cancel_split(split_id, actor).await?))
}

#[derive(Debug, Deserialize)]
struct RespondForm {
    response: SplitResponse,
}

async fn respond(
    State(state): State<AppState>,
    current: CurrentParty,
    Path((split_id, participant_id)): Path<(Uuid, Uuid)>,
    Json(form): Json<RespondForm>,
) -> Result<Json<SplitFareView>, AppError> {
    let responder = current.require_party()?;
    let split = state
        .splits
        .respond(split_id, participant_id, responder, form.response)
        .await?;
    Ok(Json(split))
}

async fn mark_paid(
    State(state): State<AppState>,
    current: CurrentParty,
    Path((split_id, participant_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SplitFareView>, AppError> {
    let payer = current.require_party()?;
    let split = state
        .splits
        .mark_paid(split_id, participant_id, payer)
        .await?;
    Ok(Json(split))
}
