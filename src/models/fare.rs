use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Zone/vehicle-class pricing as supplied by the zone configuration store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateCard {
    pub base_fare: Decimal,
    pub per_km_rate: Decimal,
    pub per_minute_rate: Decimal,
    pub minimum_fare: Decimal,
    #[serde(default)]
    pub booking_fee: Decimal,
    #[serde(default)]
    pub cancellation_fee: Decimal,
    pub surge_multiplier: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Promo {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub max_discount: Decimal,
    #[serde(default)]
    pub minimum_fare: Decimal,
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
    pub per_user_limit: Option<u32>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FareBreakdown {
    pub base_fare: Decimal,
    pub distance_amount: Decimal,
    pub time_amount: Decimal,
    pub surge_multiplier: Decimal,
    pub surge_amount: Decimal,
    pub promo_discount: Decimal,
    pub booking_fee: Decimal,
    pub cancellation_fee: Decimal,
    pub total: Decimal,
}

impl FareBreakdown {
    pub fn cancellation(fee: Decimal) -> Self {
        Self {
            surge_multiplier: Decimal::ONE,
            cancellation_fee: fee,
            total: fee,
            ..Self::default()
        }
    }
}

/// Measured or estimated trip dimensions fed into pricing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TripMeasure {
    pub distance_km: Decimal,
    pub duration_min: Decimal,
}
