use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tripcore::{
    config::AppConfig,
    db::{init_pool, migrate},
    error::AppError,
    routes::create_router,
    services::{
        catalog::{HaversineEstimator, StaticCatalog},
        ledger::LogPayoutLedger,
        notify::LogNotifier,
        trips::TripCollaborators,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = AppConfig::from_env()?;
    let db = init_pool(&config.database_url).await?;

    if let Err(err) = migrate(&db).await {
        error!("migration failed: {err:?}");
        return Err(err);
    }

    let catalog = match &config.catalog_file {
        Some(path) => {
            let catalog = StaticCatalog::load(path).await?;
            info!(path = %path.display(), "catalog loaded");
            catalog
        }
        None => {
            warn!("CATALOG_FILE not set, using built-in fallback catalog");
            StaticCatalog::fallback()
        }
    };
    let catalog = Arc::new(catalog);

    let collaborators = TripCollaborators {
        rate_cards: catalog.clone(),
        promos: catalog.clone(),
        service_area: catalog,
        routes: Arc::new(HaversineEstimator::new(config.route.clone())),
        notifier: Arc::new(LogNotifier::new(config.templates.clone())),
        ledger: Arc::new(LogPayoutLedger),
    };

    let state = AppState::new(config.clone(), db.clone(), collaborators);

    let restored = state.safety.restore().await?;
    if restored > 0 {
        info!(restored, "reloaded armed safety checks");
    }
    let _safety_listener = state.safety.spawn_trip_listener();

    let app = create_router(state.clone());

    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tripcore=debug".into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
