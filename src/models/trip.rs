use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{fare::FareBreakdown, party::CancelActor};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in kilometres.
    pub fn haversine_km(&self, other: &Coordinates) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub coordinates: Coordinates,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Economy,
    Comfort,
    Premium,
    Xl,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Economy => "economy",
            VehicleClass::Comfort => "comfort",
            VehicleClass::Premium => "premium",
            VehicleClass::Xl => "xl",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Requested,
    Accepted,
    Arrived,
    Started,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Requested => "requested",
            TripStatus::Accepted => "accepted",
            TripStatus::Arrived => "arrived",
            TripStatus::Started => "started",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub actor: CancelActor,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TripTimestamps {
    pub requested_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TripTimestamps {
    /// Recorded timestamps in lifecycle order.
    pub fn recorded(&self) -> Vec<DateTime<Utc>> {
        [
            self.requested_at,
            self.accepted_at,
            self.arrived_at,
            self.started_at,
            self.completed_at,
            self.cancelled_at,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.recorded().into_iter().max()
    }

    pub fn is_monotonic(&self) -> bool {
        let recorded = self.recorded();
        let terminals =
            usize::from(self.completed_at.is_some()) + usize::from(self.cancelled_at.is_some());
        recorded.windows(2).all(|pair| pair[0] <= pair[1]) && terminals <= 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Place,
    pub dropoff: Place,
    pub vehicle_class: VehicleClass,
    pub zone: String,
    pub status: TripStatus,
    pub timestamps: TripTimestamps,
    pub cancellation: Option<Cancellation>,
    pub estimate: FareBreakdown,
    pub fare: Option<FareBreakdown>,
    pub promo_code: Option<String>,
    #[serde(default)]
    pub promo_rejection: Option<String>,
}

impl Trip {
    pub fn is_party(&self, party_id: Uuid) -> bool {
        self.rider_id == party_id || self.driver_id == Some(party_id)
    }

    /// The fare a split is taken against: the final fare once known, otherwise the estimate.
    pub fn current_total(&self) -> rust_decimal::Decimal {
        self.fare.as_ref().unwrap_or(&self.estimate).total
    }
}
