use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`
use tripcore::{
    config::AppConfig,
    db::{init_pool, migrate},
    routes::create_router,
    services::{
        catalog::{HaversineEstimator, StaticCatalog},
        ledger::LogPayoutLedger,
        notify::LogNotifier,
        trips::TripCollaborators,
    },
    state::AppState,
};
use uuid::Uuid;

struct Harness {
    app: Router,
    _root: TempDir,
}

async fn harness() -> Harness {
    let root = TempDir::new().unwrap();
    let db_path = root.path().join("api.sqlite");
    std::fs::File::create(&db_path).unwrap();

    let config = AppConfig {
        database_url: format!("sqlite://{}", db_path.to_string_lossy()),
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        catalog_file: None,
        channel: Default::default(),
        safety: Default::default(),
        route: Default::default(),
        templates: Default::default(),
    };
    let db = init_pool(&config.database_url).await.unwrap();
    migrate(&db).await.unwrap();

    let catalog = Arc::new(StaticCatalog::fallback());
    let collaborators = TripCollaborators {
        rate_cards: catalog.clone(),
        promos: catalog.clone(),
        service_area: catalog,
        routes: Arc::new(HaversineEstimator::new(config.route.clone())),
        notifier: Arc::new(LogNotifier::new(config.templates.clone())),
        ledger: Arc::new(LogPayoutLedger),
    };
    let state = AppState::new(config, db, collaborators);
    Harness {
        app: create_router(state),
        _root: root,
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    party: Option<(Uuid, &str)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = party {
        builder = builder
            .header("x-party-id", id.to_string())
            .header("x-party-role", role);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn trip_body() -> Value {
    json!({
        "pickup": { "coordinates": { "lat": 52.52, "lng": 13.405 }, "address": "Alexanderplatz" },
        "dropoff": { "coordinates": { "lat": 52.5075, "lng": 13.3903 } },
        "vehicle_class": "economy"
    })
}

async fn requested_trip(app: &Router, rider: Uuid) -> Value {
    let (status, trip) = call(app, "POST", "/trips", Some((rider, "rider")), Some(trip_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    trip
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let h = harness().await;
    let (status, body) = call(&h.app, "POST", "/trips", None, Some(trip_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = call(
        &h.app,
        "POST",
        "/trips",
        Some((Uuid::new_v4(), "passenger")),
        Some(trip_body()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rider_requests_and_reads_a_trip() {
    let h = harness().await;
    let rider = Uuid::new_v4();
    let trip = requested_trip(&h.app, rider).await;
    assert_eq!(trip["status"], "requested");
    assert_eq!(trip["zone"], "default");
    assert!(trip["estimate"]["total"].is_string() || trip["estimate"]["total"].is_number());

    let uri = format!("/trips/{}", trip["id"].as_str().unwrap());
    let (status, fetched) = call(&h.app, "GET", &uri, Some((rider, "rider")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], trip["id"]);

    let (status, _) = call(&h.app, "GET", &uri, Some((Uuid::new_v4(), "rider")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&h.app, "GET", &uri, Some((Uuid::nil(), "system")), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn drivers_cannot_request_trips() {
    let h = harness().await;
    let (status, body) = call(
        &h.app,
        "POST",
        "/trips",
        Some((Uuid::new_v4(), "driver")),
        Some(trip_body()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn second_driver_gets_conflict() {
    let h = harness().await;
    let trip = requested_trip(&h.app, Uuid::new_v4()).await;
    let uri = format!("/trips/{}/accept", trip["id"].as_str().unwrap());

    let (status, accepted) = call(&h.app, "POST", &uri, Some((Uuid::new_v4(), "driver")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");

    let (status, body) = call(&h.app, "POST", &uri, Some((Uuid::new_v4(), "driver")), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_assigned");
}

#[tokio::test]
async fn illegal_transitions_map_to_conflict() {
    let h = harness().await;
    let driver = Uuid::new_v4();
    let trip = requested_trip(&h.app, Uuid::new_v4()).await;
    let id = trip["id"].as_str().unwrap().to_string();

    call(&h.app, "POST", &format!("/trips/{id}/accept"), Some((driver, "driver")), None).await;
    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/trips/{id}/start"),
        Some((driver, "driver")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "illegal_transition");
}

#[tokio::test]
async fn cancel_without_body_uses_default_reason() {
    let h = harness().await;
    let rider = Uuid::new_v4();
    let trip = requested_trip(&h.app, rider).await;
    let uri = format!("/trips/{}/cancel", trip["id"].as_str().unwrap());

    let (status, cancelled) = call(&h.app, "POST", &uri, Some((rider, "rider")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation"]["reason"], "no reason given");
    assert!(cancelled["fare"].is_null());
}

#[tokio::test]
async fn split_total_must_match_fare() {
    let h = harness().await;
    let rider = Uuid::new_v4();
    let trip = requested_trip(&h.app, rider).await;
    let id = trip["id"].as_str().unwrap().to_string();
    call(
        &h.app,
        "POST",
        &format!("/trips/{id}/accept"),
        Some((Uuid::new_v4(), "driver")),
        None,
    )
    .await;

    let (status, body) = call(
        &h.app,
        "POST",
        &format!("/trips/{id}/split"),
        Some((rider, "rider")),
        Some(json!({
            "total": "9999.99",
            "mode": "equal",
            "participants": [{ "kind": "contact", "value": "+15550100" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "split_mismatch");

    let (status, split) = call(
        &h.app,
        "POST",
        &format!("/trips/{id}/split"),
        Some((rider, "rider")),
        Some(json!({
            "total": trip["estimate"]["total"],
            "mode": "equal",
            "participants": [{ "kind": "contact", "value": "+15550100" }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(split["status"], "pending");
    assert_eq!(split["participants"].as_array().unwrap().len(), 2);

    let (status, fetched) = call(
        &h.app,
        "GET",
        &format!("/splits/{}", split["id"].as_str().unwrap()),
        Some((rider, "rider")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], split["id"]);
}

#[tokio::test]
async fn suspicion_signals_are_system_only() {
    let h = harness().await;
    let rider = Uuid::new_v4();
    let trip = requested_trip(&h.app, rider).await;
    let uri = format!("/trips/{}/safety/suspicion", trip["id"].as_str().unwrap());
    let body = json!({ "reason": "route_deviation" });

    let (status, _) = call(&h.app, "POST", &uri, Some((rider, "rider")), Some(body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, error) = call(&h.app, "POST", &uri, Some((Uuid::nil(), "system")), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["error"], "illegal_transition");
}
