use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionKind {
    RouteDeviation,
    UnexpectedStop,
    DurationAnomaly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SafetyOutcome {
    Pending,
    ConfirmedSafe,
    Escalated,
    /// The trip ended while the check was still armed.
    Dismissed,
}

impl SafetyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyOutcome::Pending => "pending",
            SafetyOutcome::ConfirmedSafe => "confirmed_safe",
            SafetyOutcome::Escalated => "escalated",
            SafetyOutcome::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for SafetyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub rider_id: Uuid,
    pub reason: SuspicionKind,
    pub armed_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub outcome: SafetyOutcome,
    pub resolved_at: Option<DateTime<Utc>>,
}
