use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Payout request handed to the payments side when a trip completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutEntry {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub amount: Decimal,
}

#[async_trait]
pub trait PayoutLedger: Send + Sync {
    async fn request_payout(&self, entry: PayoutEntry);
}

#[derive(Clone, Default)]
pub struct LogPayoutLedger;

#[async_trait]
impl PayoutLedger for LogPayoutLedger {
    async fn request_payout(&self, entry: PayoutEntry) {
        info!(trip_id = %entry.trip_id, driver_id = %entry.driver_id, amount = %entry.amount, "payout requested");
    }
}
