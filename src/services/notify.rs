use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{settings::NotificationTemplates, trip::Coordinates};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "target", content = "id", rename_all = "snake_case")]
pub enum NotificationTarget {
    Party(Uuid),
    /// The emergency contacts registered by this rider.
    EmergencyContactsOf(Uuid),
    Support,
    Operations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TripStatusChanged,
    SplitFareRequested,
    SosRaised,
    SafetyEscalated,
    SupportCallbackRequested,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: NotificationTarget, kind: NotificationKind, payload: Value);
}

/// Inputs for rendering a human-readable alert.
pub struct AlertContext {
    pub trip_id: Uuid,
    pub rider_id: Uuid,
    pub location: Option<Coordinates>,
    pub timestamp: DateTime<Utc>,
}

pub fn render_template(template: &str, ctx: &AlertContext) -> String {
    let (lat, lng) = ctx
        .location
        .map(|c| (format!("{:.5}", c.lat), format!("{:.5}", c.lng)))
        .unwrap_or_else(|| ("unknown".into(), "unknown".into()));
    template
        .replace("{trip}", &ctx.trip_id.to_string())
        .replace("{rider}", &ctx.rider_id.to_string())
        .replace("{lat}", &lat)
        .replace("{lng}", &lng)
        .replace("{timestamp}", &ctx.timestamp.format("%d.%m.%Y %H:%M:%S UTC").to_string())
}

/// Logs every notification with its rendered text.
#[derive(Clone, Default)]
pub struct LogNotifier {
    templates: NotificationTemplates,
}

impl LogNotifier {
    pub fn new(templates: NotificationTemplates) -> Self {
        Self { templates }
    }

    fn template_for(&self, kind: NotificationKind) -> Option<&str> {
        match kind {
            NotificationKind::SafetyEscalated => Some(&self.templates.escalation_message_template),
            NotificationKind::SosRaised => Some(&self.templates.sos_message_template),
            NotificationKind::SupportCallbackRequested => {
                Some(&self.templates.support_callback_template)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, target: NotificationTarget, kind: NotificationKind, payload: Value) {
        let rendered = self
            .template_for(kind)
            .and_then(|template| alert_context(&payload).map(|ctx| render_template(template, &ctx)));
        match rendered {
            Some(text) => warn!(?target, ?kind, %text, "alert dispatched"),
            None => info!(?target, ?kind, %payload, "notification dispatched"),
        }
    }
}

fn alert_context(payload: &Value) -> Option<AlertContext> {
    let uuid = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    };
    let location = payload
        .get("location")
        .and_then(|value| serde_json::from_value::<Coordinates>(value.clone()).ok());
    let timestamp = payload
        .get("timestamp")
        .and_then(|value| serde_json::from_value::<DateTime<Utc>>(value.clone()).ok())
        .unwrap_or_else(Utc::now);
    Some(AlertContext {
        trip_id: uuid("trip_id")?,
        rider_id: uuid("rider_id")?,
        location,
        timestamp,
    })
}
