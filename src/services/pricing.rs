use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::{
    error::AppError,
    models::fare::{DiscountType, FareBreakdown, Promo, RateCard, TripMeasure},
};

/// A promo together with how often the requesting rider has already redeemed it.
#[derive(Debug, Clone, Copy)]
pub struct PromoContext<'a> {
    pub promo: &'a Promo,
    pub rider_redemptions: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub breakdown: FareBreakdown,
    /// Set when a promo was offered but failed validation; the fare carries no discount.
    pub promo_rejection: Option<String>,
}

impl Quote {
    pub fn promo_applied(&self) -> bool {
        self.breakdown.promo_discount > Decimal::ZERO
    }
}

pub fn money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Pre-trip estimate. Same algorithm as [`finalize`].
pub fn estimate(
    measure: TripMeasure,
    rate: &RateCard,
    promo: Option<PromoContext<'_>>,
    now: DateTime<Utc>,
) -> Result<Quote, AppError> {
    quote(measure, rate, promo, now)
}

/// Final fare from measured distance and duration.
pub fn finalize(
    measure: TripMeasure,
    rate: &RateCard,
    promo: Option<PromoContext<'_>>,
    now: DateTime<Utc>,
) -> Result<Quote, AppError> {
    quote(measure, rate, promo, now)
}

pub fn cancellation_fee(rate: &RateCard) -> FareBreakdown {
    FareBreakdown::cancellation(money(rate.cancellation_fee.max(Decimal::ZERO)))
}

fn in_range(amount: Option<Decimal>) -> Result<Decimal, AppError> {
    amount.ok_or_else(|| AppError::BadRequest("fare amount out of range".into()))
}

fn quote(
    measure: TripMeasure,
    rate: &RateCard,
    promo: Option<PromoContext<'_>>,
    now: DateTime<Utc>,
) -> Result<Quote, AppError> {
    let base_fare = money(rate.base_fare);
    let distance_amount = money(in_range(
        measure.distance_km.max(Decimal::ZERO).checked_mul(rate.per_km_rate),
    )?);
    let time_amount = money(in_range(
        measure.duration_min.max(Decimal::ZERO).checked_mul(rate.per_minute_rate),
    )?);
    let subtotal = in_range(
        base_fare
            .checked_add(distance_amount)
            .and_then(|sum| sum.checked_add(time_amount)),
    )?;

    let surge_multiplier = rate.surge_multiplier.max(Decimal::ONE);
    let surged = money(in_range(subtotal.checked_mul(surge_multiplier))?);
    let surge_amount = surged - subtotal;

    let booking_fee = money(rate.booking_fee.max(Decimal::ZERO));
    let gross = in_range(surged.checked_add(booking_fee))?;

    let (promo_discount, promo_rejection) = match promo {
        None => (Decimal::ZERO, None),
        Some(ctx) => match validate_promo(ctx, gross, now) {
            Ok(()) => (discount_for(ctx.promo, gross)?, None),
            Err(err) => (Decimal::ZERO, Some(err.to_string())),
        },
    };

    let total = (gross - promo_discount)
        .max(money(rate.minimum_fare))
        .max(Decimal::ZERO);

    Ok(Quote {
        breakdown: FareBreakdown {
            base_fare,
            distance_amount,
            time_amount,
            surge_multiplier,
            surge_amount,
            promo_discount,
            booking_fee,
            cancellation_fee: Decimal::ZERO,
            total,
        },
        promo_rejection,
    })
}

/// Checks every promo rule against the undiscounted fare.
pub fn validate_promo(
    ctx: PromoContext<'_>,
    fare: Decimal,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let promo = ctx.promo;
    if !promo.active {
        return Err(AppError::PromoInvalid(format!("{} is not active", promo.code)));
    }
    if promo.valid_from.is_some_and(|from| now < from) {
        return Err(AppError::PromoInvalid(format!("{} is not valid yet", promo.code)));
    }
    if promo.valid_until.is_some_and(|until| now > until) {
        return Err(AppError::PromoInvalid(format!("{} has expired", promo.code)));
    }
    if promo
        .usage_limit
        .is_some_and(|limit| promo.usage_count >= limit)
    {
        return Err(AppError::PromoInvalid(format!(
            "{} has reached its usage limit",
            promo.code
        )));
    }
    if promo
        .per_user_limit
        .is_some_and(|limit| ctx.rider_redemptions >= limit)
    {
        return Err(AppError::PromoInvalid(format!(
            "{} already used the maximum number of times",
            promo.code
        )));
    }
    if fare < promo.minimum_fare {
        return Err(AppError::PromoInvalid(format!(
            "{} requires a fare of at least {}",
            promo.code, promo.minimum_fare
        )));
    }
    Ok(())
}

fn discount_for(promo: &Promo, fare: Decimal) -> Result<Decimal, AppError> {
    let raw = match promo.discount_type {
        DiscountType::Percentage => {
            in_range(fare.checked_mul(promo.discount_value))? / Decimal::ONE_HUNDRED
        }
        DiscountType::Fixed => promo.discount_value,
    };
    Ok(money(raw.max(Decimal::ZERO).min(promo.max_discount).min(fare)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn card() -> RateCard {
        RateCard {
            base_fare: dec!(3.00),
            per_km_rate: dec!(1.00),
            per_minute_rate: dec!(0.20),
            minimum_fare: dec!(5.00),
            booking_fee: dec!(0),
            cancellation_fee: dec!(4.50),
            surge_multiplier: dec!(1.0),
        }
    }

    fn measure(km: Decimal, min: Decimal) -> TripMeasure {
        TripMeasure {
            distance_km: km,
            duration_min: min,
        }
    }

    fn ten_percent() -> Promo {
        Promo {
            code: "TENOFF".into(),
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            max_discount: dec!(2.00),
            minimum_fare: dec!(8.00),
            usage_limit: Some(100),
            usage_count: 0,
            per_user_limit: Some(1),
            valid_from: None,
            valid_until: None,
            active: true,
        }
    }

    #[test]
    fn five_km_twelve_minutes_costs_ten_forty() {
        let quote = estimate(measure(dec!(5), dec!(12)), &card(), None, Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.total, dec!(10.40));
        assert_eq!(quote.breakdown.time_amount, dec!(2.40));
        assert_eq!(quote.breakdown.surge_amount, dec!(0));
    }

    #[test]
    fn percentage_promo_takes_ten_percent() {
        let promo = ten_percent();
        let ctx = PromoContext {
            promo: &promo,
            rider_redemptions: 0,
        };
        let quote = estimate(measure(dec!(5), dec!(12)), &card(), Some(ctx), Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.promo_discount, dec!(1.04));
        assert_eq!(quote.breakdown.total, dec!(9.36));
        assert!(quote.promo_rejection.is_none());
    }

    #[test]
    fn discount_is_capped_at_max() {
        let mut promo = ten_percent();
        promo.discount_value = dec!(50);
        let ctx = PromoContext {
            promo: &promo,
            rider_redemptions: 0,
        };
        let quote = finalize(measure(dec!(20), dec!(30)), &card(), Some(ctx), Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.promo_discount, dec!(2.00));
        assert_eq!(quote.breakdown.total, dec!(27.00));
    }

    #[test]
    fn short_trip_is_clamped_to_minimum() {
        let quote = finalize(measure(dec!(0.5), dec!(2)), &card(), None, Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.total, dec!(5.00));
    }

    #[test]
    fn surge_scales_before_discount_and_booking_fee_is_not_surged() {
        let mut rate = card();
        rate.surge_multiplier = dec!(1.5);
        rate.booking_fee = dec!(1.00);
        let quote = finalize(measure(dec!(5), dec!(12)), &rate, None, Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.surge_amount, dec!(5.20));
        assert_eq!(quote.breakdown.total, dec!(16.60));
    }

    #[test]
    fn configured_surge_below_one_is_ignored() {
        let mut rate = card();
        rate.surge_multiplier = dec!(0.5);
        let quote = finalize(measure(dec!(5), dec!(12)), &rate, None, Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.surge_multiplier, Decimal::ONE);
        assert_eq!(quote.breakdown.total, dec!(10.40));
    }

    #[test]
    fn rejected_promo_is_soft() {
        let mut promo = ten_percent();
        promo.minimum_fare = dec!(20.00);
        let ctx = PromoContext {
            promo: &promo,
            rider_redemptions: 0,
        };
        let quote = estimate(measure(dec!(5), dec!(12)), &card(), Some(ctx), Utc::now()).expect("quote");
        assert_eq!(quote.breakdown.total, dec!(10.40));
        assert!(quote.promo_rejection.is_some());
        assert!(!quote.promo_applied());
    }

    #[test]
    fn promo_rules_are_each_enforced() {
        let now = Utc::now();
        let base = ten_percent();
        let check = |promo: &Promo, used: u32| {
            validate_promo(
                PromoContext {
                    promo,
                    rider_redemptions: used,
                },
                dec!(10.40),
                now,
            )
        };

        assert!(check(&base, 0).is_ok());
        assert!(matches!(check(&base, 1), Err(AppError::PromoInvalid(_))));

        let mut inactive = base.clone();
        inactive.active = false;
        assert!(check(&inactive, 0).is_err());

        let mut exhausted = base.clone();
        exhausted.usage_count = 100;
        assert!(check(&exhausted, 0).is_err());

        let mut expired = base.clone();
        expired.valid_until = Some(now - chrono::Duration::days(1));
        assert!(check(&expired, 0).is_err());

        let mut future = base;
        future.valid_from = Some(now + chrono::Duration::days(1));
        assert!(check(&future, 0).is_err());
    }

    #[test]
    fn overflowing_measure_is_rejected() {
        let err = finalize(measure(Decimal::MAX, Decimal::MAX), &card(), None, Utc::now())
            .expect_err("overflow");
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn cancellation_breakdown_holds_only_the_fee() {
        let fare = cancellation_fee(&card());
        assert_eq!(fare.cancellation_fee, dec!(4.50));
        assert_eq!(fare.total, dec!(4.50));
        assert_eq!(fare.base_fare, dec!(0));
    }
}
