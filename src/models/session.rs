use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::party::Party;

/// Snapshot of a live coordination session. Sessions themselves are never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub party: Party,
    pub connected_at: DateTime<Utc>,
    pub subscriptions: Vec<Uuid>,
}
