use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        event::CoordinationEvent,
        fare::TripMeasure,
        party::{CancelActor, Party, PartyRole},
        trip::{Cancellation, Place, Trip, TripStatus, TripTimestamps, VehicleClass},
    },
    services::{
        catalog::{PromoStore, RateCardStore, RouteEstimator, ServiceArea},
        coordination::CoordinationHub,
        ledger::{PayoutEntry, PayoutLedger},
        locks::KeyedLocks,
        notify::{NotificationKind, NotificationTarget, Notifier},
        pricing::{self, PromoContext},
        storage::StorageService,
    },
};

/// Pickup and dropoff closer than this are treated as the same place.
const MIN_TRIP_KM: f64 = 0.01;

#[derive(Debug, Clone, Deserialize)]
pub struct TripRequest {
    pub pickup: Place,
    pub dropoff: Place,
    pub vehicle_class: VehicleClass,
    #[serde(default)]
    pub promo_code: Option<String>,
}

/// External systems the state machine consults.
#[derive(Clone)]
pub struct TripCollaborators {
    pub rate_cards: Arc<dyn RateCardStore>,
    pub promos: Arc<dyn PromoStore>,
    pub service_area: Arc<dyn ServiceArea>,
    pub routes: Arc<dyn RouteEstimator>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Arc<dyn PayoutLedger>,
}

#[derive(Clone)]
pub struct TripService {
    inner: Arc<TripInner>,
}

struct TripInner {
    storage: StorageService,
    hub: CoordinationHub,
    collaborators: TripCollaborators,
    locks: KeyedLocks,
}

impl TripService {
    pub fn new(
        storage: StorageService,
        hub: CoordinationHub,
        collaborators: TripCollaborators,
    ) -> Self {
        Self {
            inner: Arc::new(TripInner {
                storage,
                hub,
                collaborators,
                locks: KeyedLocks::new(),
            }),
        }
    }

    /// Per-trip locks. Anything that must not interleave with a transition
    /// takes the same lock.
    pub fn trip_locks(&self) -> KeyedLocks {
        self.inner.locks.clone()
    }

    pub async fn find(&self, trip_id: Uuid) -> Result<Trip, AppError> {
        self.inner
            .storage
            .load_trip(trip_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Trip snapshot for one of its parties or the system.
    pub async fn get_trip(&self, trip_id: Uuid, viewer: Party) -> Result<Trip, AppError> {
        let trip = self.find(trip_id).await?;
        if viewer.role == PartyRole::System || trip.is_party(viewer.id) {
            Ok(trip)
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub async fn request_trip(&self, rider: Party, request: TripRequest) -> Result<Trip, AppError> {
        if rider.role != PartyRole::Rider {
            return Err(AppError::Forbidden);
        }
        let collab = &self.inner.collaborators;
        let pickup = request.pickup.coordinates;
        let dropoff = request.dropoff.coordinates;
        if !pickup.is_valid() || !dropoff.is_valid() {
            return Err(AppError::InvalidLocation("coordinates out of range".into()));
        }
        if pickup.haversine_km(&dropoff) < MIN_TRIP_KM {
            return Err(AppError::InvalidLocation(
                "pickup and dropoff are the same place".into(),
            ));
        }
        let zone = collab
            .service_area
            .zone_for(&pickup)
            .ok_or_else(|| AppError::InvalidLocation("pickup is outside the service area".into()))?;
        if collab.service_area.zone_for(&dropoff).is_none() {
            return Err(AppError::InvalidLocation(
                "dropoff is outside the service area".into(),
            ));
        }

        let rate = collab.rate_cards.rate_card(&zone, request.vehicle_class).await?;
        let measure = collab.routes.estimate(&pickup, &dropoff);
        let now = Utc::now();

        let promo_code = request
            .promo_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(str::to_string);
        let (estimate, promo_rejection) = match &promo_code {
            None => (pricing::estimate(measure, &rate, None, now)?.breakdown, None),
            Some(code) => match collab.promos.promo(code).await? {
                None => (
                    pricing::estimate(measure, &rate, None, now)?.breakdown,
                    Some(AppError::PromoInvalid(format!("unknown promo code {code}")).to_string()),
                ),
                Some(promo) => {
                    let used = collab.promos.redemptions_by(code, rider.id).await?;
                    let ctx = PromoContext {
                        promo: &promo,
                        rider_redemptions: used,
                    };
                    let quote = pricing::estimate(measure, &rate, Some(ctx), now)?;
                    (quote.breakdown, quote.promo_rejection)
                }
            },
        };

        let mut trip = Trip {
            id: Uuid::new_v4(),
            rider_id: rider.id,
            driver_id: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            vehicle_class: request.vehicle_class,
            zone,
            status: TripStatus::Requested,
            timestamps: TripTimestamps {
                requested_at: Some(now),
                ..TripTimestamps::default()
            },
            cancellation: None,
            estimate,
            fare: None,
            promo_code,
            promo_rejection,
        };
        self.inner.storage.save_trip(&trip).await?;

        // The redemption is counted only once the trip exists. Losing a race for
        // the last redemption reprices the trip without the promo.
        let redeemable = trip
            .promo_code
            .clone()
            .filter(|_| trip.estimate.promo_discount > Decimal::ZERO);
        if let Some(code) = redeemable {
            if !collab.promos.try_redeem(&code, rider.id).await? {
                trip.estimate = pricing::estimate(measure, &rate, None, now)?.breakdown;
                trip.promo_rejection = Some(
                    AppError::PromoInvalid(format!("{code} has reached its usage limit")).to_string(),
                );
                self.inner.storage.save_trip(&trip).await?;
            }
        }
        if let Some(reason) = &trip.promo_rejection {
            warn!(rider_id = %rider.id, %reason, "promo not applied");
        }
        info!(trip_id = %trip.id, rider_id = %rider.id, zone = %trip.zone, estimate = %trip.estimate.total, "trip requested");
        self.publish(None, &trip).await;
        Ok(trip)
    }

    /// First driver to take the trip lock wins; later callers see `AlreadyAssigned`.
    pub async fn accept_trip(&self, trip_id: Uuid, driver: Party) -> Result<Trip, AppError> {
        if driver.role != PartyRole::Driver {
            return Err(AppError::Forbidden);
        }
        let _guard = self.inner.locks.lock(trip_id).await;
        let current = self.find(trip_id).await?;
        if current.driver_id.is_some_and(|assigned| assigned != driver.id) {
            return Err(AppError::AlreadyAssigned);
        }
        if current.status != TripStatus::Requested {
            return Err(AppError::illegal(current.status, "accept"));
        }

        let mut trip = current.clone();
        let at = stamp(&trip);
        trip.driver_id = Some(driver.id);
        trip.status = TripStatus::Accepted;
        trip.timestamps.accepted_at = Some(at);
        self.commit(current.status, trip, driver.id).await
    }

    pub async fn mark_arrived(&self, trip_id: Uuid, driver: Party) -> Result<Trip, AppError> {
        self.driver_step(trip_id, driver, TripStatus::Accepted, TripStatus::Arrived, "arrive")
            .await
    }

    pub async fn start_trip(&self, trip_id: Uuid, driver: Party) -> Result<Trip, AppError> {
        self.driver_step(trip_id, driver, TripStatus::Arrived, TripStatus::Started, "start")
            .await
    }

    async fn driver_step(
        &self,
        trip_id: Uuid,
        driver: Party,
        from: TripStatus,
        to: TripStatus,
        action: &'static str,
    ) -> Result<Trip, AppError> {
        let _guard = self.inner.locks.lock(trip_id).await;
        let current = self.find(trip_id).await?;
        ensure_assigned_driver(&current, driver)?;
        if current.status != from {
            return Err(AppError::illegal(current.status, action));
        }

        let mut trip = current.clone();
        let at = stamp(&trip);
        trip.status = to;
        match to {
            TripStatus::Arrived => trip.timestamps.arrived_at = Some(at),
            TripStatus::Started => trip.timestamps.started_at = Some(at),
            _ => return Err(AppError::illegal(current.status, action)),
        }
        self.commit(current.status, trip, driver.id).await
    }

    /// Prices the trip from measured distance and duration and completes it.
    pub async fn complete_trip(
        &self,
        trip_id: Uuid,
        driver: Party,
        actual: TripMeasure,
    ) -> Result<Trip, AppError> {
        if actual.distance_km < Decimal::ZERO || actual.duration_min < Decimal::ZERO {
            return Err(AppError::BadRequest(
                "distance and duration must not be negative".into(),
            ));
        }
        let _guard = self.inner.locks.lock(trip_id).await;
        let current = self.find(trip_id).await?;
        ensure_assigned_driver(&current, driver)?;
        if current.status != TripStatus::Started {
            return Err(AppError::illegal(current.status, "complete"));
        }

        let collab = &self.inner.collaborators;
        let rate = collab
            .rate_cards
            .rate_card(&current.zone, current.vehicle_class)
            .await?;
        let now = Utc::now();

        // A promo redeemed at request time is re-validated against the actual
        // fare, without counting this trip's own redemption against it.
        let promo = match (&current.promo_code, current.estimate.promo_discount > Decimal::ZERO) {
            (Some(code), true) => match collab.promos.promo(code).await? {
                Some(mut promo) => {
                    promo.usage_count = promo.usage_count.saturating_sub(1);
                    let used = collab.promos.redemptions_by(code, current.rider_id).await?;
                    Some((promo, used.saturating_sub(1)))
                }
                None => None,
            },
            _ => None,
        };
        let quote = pricing::finalize(
            actual,
            &rate,
            promo.as_ref().map(|(promo, used)| PromoContext {
                promo,
                rider_redemptions: *used,
            }),
            now,
        )?;
        if let Some(reason) = &quote.promo_rejection {
            warn!(trip_id = %trip_id, %reason, "promo dropped from final fare");
        }

        let mut trip = current.clone();
        let at = stamp(&trip);
        trip.status = TripStatus::Completed;
        trip.timestamps.completed_at = Some(at);
        trip.fare = Some(quote.breakdown);
        let trip = self.commit(current.status, trip, driver.id).await?;

        if let (Some(driver_id), Some(fare)) = (trip.driver_id, &trip.fare) {
            collab
                .ledger
                .request_payout(PayoutEntry {
                    trip_id,
                    driver_id,
                    amount: fare.total,
                })
                .await;
        }
        Ok(trip)
    }

    /// Cancels from any non-terminal state. A rider cancelling after a driver has
    /// accepted, but before the ride starts, is charged the zone's cancellation fee.
    pub async fn cancel_trip(
        &self,
        trip_id: Uuid,
        actor: Party,
        reason: String,
    ) -> Result<Trip, AppError> {
        let _guard = self.inner.locks.lock(trip_id).await;
        let current = self.find(trip_id).await?;
        let allowed = match actor.role {
            PartyRole::System => true,
            PartyRole::Rider => current.rider_id == actor.id,
            PartyRole::Driver => current.driver_id == Some(actor.id),
        };
        if !allowed {
            return Err(AppError::Forbidden);
        }
        if current.status.is_terminal() {
            return Err(AppError::illegal(current.status, "cancel"));
        }

        let mut trip = current.clone();
        let charge_fee = actor.role == PartyRole::Rider
            && matches!(current.status, TripStatus::Accepted | TripStatus::Arrived);
        if charge_fee {
            let rate = self
                .inner
                .collaborators
                .rate_cards
                .rate_card(&current.zone, current.vehicle_class)
                .await?;
            let fee = pricing::cancellation_fee(&rate);
            if fee.total > Decimal::ZERO {
                debug!(trip_id = %trip_id, fee = %fee.total, "cancellation fee charged");
                trip.fare = Some(fee);
            }
        }

        let reason = reason.trim();
        let at = stamp(&trip);
        trip.status = TripStatus::Cancelled;
        trip.timestamps.cancelled_at = Some(at);
        trip.cancellation = Some(Cancellation {
            actor: CancelActor::from(actor.role),
            reason: if reason.is_empty() {
                "no reason given".to_string()
            } else {
                reason.to_string()
            },
        });
        self.commit(current.status, trip, actor.id).await
    }

    async fn commit(&self, previous: TripStatus, trip: Trip, actor_id: Uuid) -> Result<Trip, AppError> {
        debug_assert!(trip.timestamps.is_monotonic());
        self.inner.storage.save_trip(&trip).await?;
        info!(trip_id = %trip.id, from = %previous, to = %trip.status, "trip transition");

        self.publish(Some(previous), &trip).await;
        self.notify_parties(&trip, actor_id).await;
        if trip.status.is_terminal() {
            self.inner.hub.retire_trip(trip.id).await;
        }
        Ok(trip)
    }

    async fn publish(&self, previous: Option<TripStatus>, trip: &Trip) {
        self.inner
            .hub
            .publish(
                trip.id,
                CoordinationEvent::TripStatusChanged {
                    trip_id: trip.id,
                    previous,
                    status: trip.status,
                    trip: Box::new(trip.clone()),
                },
            )
            .await;
    }

    async fn notify_parties(&self, trip: &Trip, actor_id: Uuid) {
        let parties = std::iter::once(trip.rider_id).chain(trip.driver_id);
        for party_id in parties.filter(|id| *id != actor_id) {
            self.inner
                .collaborators
                .notifier
                .notify(
                    NotificationTarget::Party(party_id),
                    NotificationKind::TripStatusChanged,
                    json!({ "trip_id": trip.id, "status": trip.status }),
                )
                .await;
        }
    }
}

fn ensure_assigned_driver(trip: &Trip, driver: Party) -> Result<(), AppError> {
    if driver.role == PartyRole::Driver && trip.driver_id == Some(driver.id) {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Wall-clock now, but never earlier than anything already recorded on the trip.
fn stamp(trip: &Trip) -> DateTime<Utc> {
    let now = Utc::now();
    trip.timestamps
        .latest()
        .map_or(now, |latest| latest.max(now))
}
