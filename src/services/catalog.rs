use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::fs;
use uuid::Uuid;

use crate::{
    config::RouteSettings,
    error::AppError,
    models::{
        fare::{Promo, RateCard, TripMeasure},
        settings::{CatalogFile, RateCardEntry, Zone},
        trip::{Coordinates, VehicleClass},
    },
};

#[async_trait]
pub trait RateCardStore: Send + Sync {
    async fn rate_card(&self, zone: &str, class: VehicleClass) -> Result<RateCard, AppError>;
}

#[async_trait]
pub trait PromoStore: Send + Sync {
    async fn promo(&self, code: &str) -> Result<Option<Promo>, AppError>;
    async fn redemptions_by(&self, code: &str, rider_id: Uuid) -> Result<u32, AppError>;
    /// Counts one redemption unless a usage limit is already reached. Returns
    /// whether the redemption was recorded.
    async fn try_redeem(&self, code: &str, rider_id: Uuid) -> Result<bool, AppError>;
}

pub trait ServiceArea: Send + Sync {
    /// Name of the pricing zone containing `point`, if it is served at all.
    fn zone_for(&self, point: &Coordinates) -> Option<String>;
}

pub trait RouteEstimator: Send + Sync {
    fn estimate(&self, pickup: &Coordinates, dropoff: &Coordinates) -> TripMeasure;
}

/// Great-circle distance stretched by a road factor, timed at an average speed.
#[derive(Debug, Clone)]
pub struct HaversineEstimator {
    settings: RouteSettings,
}

impl HaversineEstimator {
    pub fn new(settings: RouteSettings) -> Self {
        Self { settings }
    }
}

impl RouteEstimator for HaversineEstimator {
    fn estimate(&self, pickup: &Coordinates, dropoff: &Coordinates) -> TripMeasure {
        let km = pickup.haversine_km(dropoff) * self.settings.road_factor;
        let minutes = km / self.settings.average_speed_kmh * 60.0;
        TripMeasure {
            distance_km: Decimal::from_f64_retain(km).unwrap_or_default().round_dp(2),
            duration_min: Decimal::from_f64_retain(minutes)
                .unwrap_or_default()
                .round_dp(1),
        }
    }
}

/// In-memory catalog, loaded from a JSON file or built in code.
#[derive(Clone, Default)]
pub struct StaticCatalog {
    zones: Arc<Vec<Zone>>,
    rate_cards: Arc<HashMap<(String, VehicleClass), RateCard>>,
    promos: Arc<Mutex<PromoLedger>>,
}

#[derive(Default)]
struct PromoLedger {
    promos: HashMap<String, Promo>,
    redemptions: HashMap<(String, Uuid), u32>,
}

impl StaticCatalog {
    pub fn new(file: CatalogFile) -> Self {
        let rate_cards = file
            .rate_cards
            .into_iter()
            .map(|RateCardEntry { zone, vehicle_class, card }| ((zone, vehicle_class), card))
            .collect();
        let promos = file
            .promos
            .into_iter()
            .map(|promo| (normalize_code(&promo.code), promo))
            .collect();
        Self {
            zones: Arc::new(file.zones),
            rate_cards: Arc::new(rate_cards),
            promos: Arc::new(Mutex::new(PromoLedger {
                promos,
                redemptions: HashMap::new(),
            })),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read(path).await?;
        let file: CatalogFile = serde_json::from_slice(&raw)?;
        if file.zones.is_empty() {
            return Err(AppError::Config(format!(
                "catalog {} defines no zones",
                path.display()
            )));
        }
        Ok(Self::new(file))
    }

    /// A single world-wide zone with one economy rate card, for local runs.
    pub fn fallback() -> Self {
        let card = RateCard {
            base_fare: Decimal::new(300, 2),
            per_km_rate: Decimal::new(100, 2),
            per_minute_rate: Decimal::new(20, 2),
            minimum_fare: Decimal::new(500, 2),
            booking_fee: Decimal::ZERO,
            cancellation_fee: Decimal::new(400, 2),
            surge_multiplier: Decimal::ONE,
        };
        let rate_cards = [
            VehicleClass::Economy,
            VehicleClass::Comfort,
            VehicleClass::Premium,
            VehicleClass::Xl,
        ]
        .into_iter()
        .map(|vehicle_class| RateCardEntry {
            zone: "default".into(),
            vehicle_class,
            card: card.clone(),
        })
        .collect();
        Self::new(CatalogFile {
            zones: vec![Zone {
                name: "default".into(),
                min_lat: -90.0,
                max_lat: 90.0,
                min_lng: -180.0,
                max_lng: 180.0,
            }],
            rate_cards,
            promos: Vec::new(),
        })
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl ServiceArea for StaticCatalog {
    fn zone_for(&self, point: &Coordinates) -> Option<String> {
        if !point.is_valid() {
            return None;
        }
        self.zones
            .iter()
            .find(|zone| zone.contains(point))
            .map(|zone| zone.name.clone())
    }
}

#[async_trait]
impl RateCardStore for StaticCatalog {
    async fn rate_card(&self, zone: &str, class: VehicleClass) -> Result<RateCard, AppError> {
        self.rate_cards
            .get(&(zone.to_string(), class))
            .cloned()
            .ok_or_else(|| {
                AppError::BadRequest(format!("{class} is not offered in zone {zone}"))
            })
    }
}

#[async_trait]
impl PromoStore for StaticCatalog {
    async fn promo(&self, code: &str) -> Result<Option<Promo>, AppError> {
        let ledger = self.promos.lock().map_err(poisoned)?;
        Ok(ledger.promos.get(&normalize_code(code)).cloned())
    }

    async fn redemptions_by(&self, code: &str, rider_id: Uuid) -> Result<u32, AppError> {
        let ledger = self.promos.lock().map_err(poisoned)?;
        Ok(ledger
            .redemptions
            .get(&(normalize_code(code), rider_id))
            .copied()
            .unwrap_or(0))
    }

    async fn try_redeem(&self, code: &str, rider_id: Uuid) -> Result<bool, AppError> {
        let code = normalize_code(code);
        let mut guard = self.promos.lock().map_err(poisoned)?;
        let ledger = &mut *guard;
        let Some(promo) = ledger.promos.get_mut(&code) else {
            return Ok(false);
        };
        let used = ledger.redemptions.entry((code, rider_id)).or_default();
        let exhausted = promo.usage_limit.is_some_and(|limit| promo.usage_count >= limit);
        let spent = promo.per_user_limit.is_some_and(|limit| *used >= limit);
        if exhausted || spent {
            return Ok(false);
        }
        promo.usage_count += 1;
        *used += 1;
        Ok(true)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> AppError {
    AppError::Other(anyhow::anyhow!("promo ledger lock poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_zone_serves_any_valid_point() {
        let catalog = StaticCatalog::fallback();
        assert_eq!(
            catalog.zone_for(&Coordinates::new(52.52, 13.40)).as_deref(),
            Some("default")
        );
        assert_eq!(catalog.zone_for(&Coordinates::new(95.0, 13.40)), None);
    }

    #[test]
    fn haversine_estimate_applies_road_factor_and_speed() {
        let estimator = HaversineEstimator::new(RouteSettings {
            road_factor: 1.0,
            average_speed_kmh: 60.0,
        });
        // One degree of latitude is roughly 111.19 km.
        let measure = estimator.estimate(&Coordinates::new(0.0, 0.0), &Coordinates::new(1.0, 0.0));
        assert!((measure.distance_km - Decimal::new(11119, 2)).abs() < Decimal::ONE);
        assert!((measure.duration_min - Decimal::new(1112, 1)).abs() < Decimal::ONE);
    }

    #[tokio::test]
    async fn redemptions_are_counted_per_rider() {
        let catalog = StaticCatalog::new(CatalogFile {
            zones: Vec::new(),
            rate_cards: Vec::new(),
            promos: vec![Promo {
                code: "Welcome".into(),
                discount_type: crate::models::fare::DiscountType::Fixed,
                discount_value: Decimal::ONE,
                max_discount: Decimal::ONE,
                minimum_fare: Decimal::ZERO,
                usage_limit: None,
                usage_count: 0,
                per_user_limit: Some(1),
                valid_from: None,
                valid_until: None,
                active: true,
            }],
        });
        let rider = Uuid::new_v4();
        assert!(catalog.try_redeem("welcome", rider).await.expect("redeem"));
        assert!(!catalog.try_redeem("WELCOME", rider).await.expect("second redeem"));
        assert!(!catalog.try_redeem("unknown", rider).await.expect("unknown code"));
        assert_eq!(catalog.redemptions_by("WELCOME", rider).await.expect("count"), 1);
        let promo = catalog.promo(" welcome ").await.expect("lookup").expect("promo");
        assert_eq!(promo.usage_count, 1);

        let other = Uuid::new_v4();
        assert!(catalog.try_redeem("welcome", other).await.expect("other rider"));
    }
}
