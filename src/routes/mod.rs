pub mod safety;
pub mod splits;
pub mod trips;
pub mod ws;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/trips", trips::router().merge(safety::router()))
        .nest("/splits", splits::router())
        .merge(ws::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
