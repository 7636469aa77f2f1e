use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        coordination::CoordinationHub, safety::SafetyService, split::SplitService,
        storage::StorageService, trips::{TripCollaborators, TripService},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub storage: StorageService,
    pub hub: CoordinationHub,
    pub trips: TripService,
    pub splits: SplitService,
    pub safety: SafetyService,
}

impl AppState {
    pub fn new(config: AppConfig, db: DbPool, collaborators: TripCollaborators) -> Self {
        let storage = StorageService::new(db.clone());
        let notifier = collaborators.notifier.clone();
        let hub = CoordinationHub::new(config.channel.clone(), storage.clone(), notifier.clone());
        let trips = TripService::new(storage.clone(), hub.clone(), collaborators);
        let splits = SplitService::new(storage.clone(), trips.clone(), hub.clone(), notifier.clone());
        let safety = SafetyService::new(
            config.safety.clone(),
            storage.clone(),
            trips.clone(),
            hub.clone(),
            notifier,
        );
        Self {
            config,
            db,
            storage,
            hub,
            trips,
            splits,
            safety,
        }
    }
}
