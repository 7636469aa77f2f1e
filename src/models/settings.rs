use serde::{Deserialize, Serialize};

use super::{
    fare::{Promo, RateCard},
    trip::{Coordinates, VehicleClass},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTemplates {
    pub escalation_message_template: String,
    pub sos_message_template: String,
    pub support_callback_template: String,
}

impl Default for NotificationTemplates {
    fn default() -> Self {
        Self {
            escalation_message_template: "Safety alert: your contact's ride {trip} has not answered a safety check. Last known position {lat},{lng} at {timestamp}.".into(),
            sos_message_template: "SOS raised on ride {trip} by {rider}. Position {lat},{lng} at {timestamp}.".into(),
            support_callback_template: "Call back rider {rider} about ride {trip}: safety check unanswered since {timestamp}.".into(),
        }
    }
}

/// A rectangular pricing zone inside the service area.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub name: String,
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Zone {
    pub fn contains(&self, point: &Coordinates) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateCardEntry {
    pub zone: String,
    pub vehicle_class: VehicleClass,
    #[serde(flatten)]
    pub card: RateCard,
}

/// On-disk shape of the catalog file (`CATALOG_FILE`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    pub zones: Vec<Zone>,
    pub rate_cards: Vec<RateCardEntry>,
    #[serde(default)]
    pub promos: Vec<Promo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_bounds_are_inclusive() {
        let zone = Zone {
            name: "centre".into(),
            min_lat: 52.0,
            max_lat: 53.0,
            min_lng: 13.0,
            max_lng: 14.0,
        };
        assert!(zone.contains(&Coordinates::new(52.0, 14.0)));
        assert!(!zone.contains(&Coordinates::new(51.99, 13.5)));
    }
}
