use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Rider,
    Driver,
    System,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartyRole::Rider => "rider",
            PartyRole::Driver => "driver",
            PartyRole::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rider" => Some(PartyRole::Rider),
            "driver" => Some(PartyRole::Driver),
            "system" => Some(PartyRole::System),
            _ => None,
        }
    }
}

impl fmt::Display for PartyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An identity asserted by the upstream gateway. Never re-authenticated here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Party {
    pub id: Uuid,
    pub role: PartyRole,
}

impl Party {
    pub fn rider(id: Uuid) -> Self {
        Self {
            id,
            role: PartyRole::Rider,
        }
    }

    pub fn driver(id: Uuid) -> Self {
        Self {
            id,
            role: PartyRole::Driver,
        }
    }

    pub fn system() -> Self {
        Self {
            id: Uuid::nil(),
            role: PartyRole::System,
        }
    }
}

/// Who cancelled a trip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelActor {
    Rider,
    Driver,
    System,
}

impl From<PartyRole> for CancelActor {
    fn from(role: PartyRole) -> Self {
        match role {
            PartyRole::Rider => CancelActor::Rider,
            PartyRole::Driver => CancelActor::Driver,
            PartyRole::System => CancelActor::System,
        }
    }
}
