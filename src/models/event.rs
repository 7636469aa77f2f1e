use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    party::PartyRole,
    safety::{SafetyCheck, SafetyOutcome},
    split::SplitFareView,
    trip::{Coordinates, Trip, TripStatus},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub trip_id: Uuid,
    pub seq: u64,
    pub sender_id: Uuid,
    pub sender_role: PartyRole,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SosEvent {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub party_id: Uuid,
    pub role: PartyRole,
    pub location: Coordinates,
    pub timestamp: DateTime<Utc>,
}

/// Everything the coordination channel can push to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    TripStatusChanged {
        trip_id: Uuid,
        previous: Option<TripStatus>,
        status: TripStatus,
        trip: Box<Trip>,
    },
    DriverLocationUpdated {
        trip_id: Uuid,
        sample: LocationSample,
    },
    ChatMessageReceived {
        message: ChatMessage,
    },
    SafetyCheckArmed {
        trip_id: Uuid,
        check: SafetyCheck,
    },
    SafetyCheckResolved {
        trip_id: Uuid,
        check_id: Uuid,
        outcome: SafetyOutcome,
    },
    SplitFareUpdated {
        trip_id: Uuid,
        split: Box<SplitFareView>,
    },
    SosAcknowledged {
        trip_id: Uuid,
        sos_id: Uuid,
    },
    Subscribed {
        trip_id: Uuid,
        last_seq: u64,
    },
    SessionSuperseded,
    Error {
        kind: String,
        message: String,
    },
}

/// Frames a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        trip_id: Uuid,
        #[serde(default)]
        last_seen_seq: Option<u64>,
    },
    Unsubscribe {
        trip_id: Uuid,
    },
    Location {
        trip_id: Uuid,
        sample: LocationSample,
    },
    Chat {
        trip_id: Uuid,
        body: String,
    },
    Sos {
        trip_id: Uuid,
        location: Coordinates,
    },
    ConfirmSafe {
        trip_id: Uuid,
    },
}
