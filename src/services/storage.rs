use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::Row;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        event::{ChatMessage, LocationSample, SosEvent},
        party::PartyRole,
        safety::{SafetyCheck, SafetyOutcome},
        split::SplitFare,
        trip::Trip,
    },
};

/// Persistence collaborator. Aggregates are stored as JSON next to the columns we query on.
#[derive(Clone)]
pub struct StorageService {
    db: DbPool,
}

impl StorageService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn save_trip(&self, trip: &Trip) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO trips (id, rider_id, driver_id, status, body, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   driver_id = excluded.driver_id,
                   status = excluded.status,
                   body = excluded.body,
                   updated_at = excluded.updated_at"#,
        )
        .bind(trip.id.to_string())
        .bind(trip.rider_id.to_string())
        .bind(trip.driver_id.map(|id| id.to_string()))
        .bind(trip.status.as_str())
        .bind(to_json(trip)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load_trip(&self, trip_id: Uuid) -> Result<Option<Trip>, AppError> {
        let row = sqlx::query("SELECT body FROM trips WHERE id = ?")
            .bind(trip_id.to_string())
            .fetch_optional(&self.db)
            .await?;
        row.map(|row| from_json(&row.try_get::<String, _>("body")?))
            .transpose()
    }

    pub async fn save_split(&self, split: &SplitFare) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO split_fares (id, trip_id, cancelled, body, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   cancelled = excluded.cancelled,
                   body = excluded.body,
                   updated_at = excluded.updated_at"#,
        )
        .bind(split.id.to_string())
        .bind(split.trip_id.to_string())
        .bind(split.cancelled_at.is_some())
        .bind(to_json(split)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load_split(&self, split_id: Uuid) -> Result<Option<SplitFare>, AppError> {
        let row = sqlx::query("SELECT body FROM split_fares WHERE id = ?")
            .bind(split_id.to_string())
            .fetch_optional(&self.db)
            .await?;
        row.map(|row| from_json(&row.try_get::<String, _>("body")?))
            .transpose()
    }

    pub async fn open_split_for_trip(&self, trip_id: Uuid) -> Result<Option<SplitFare>, AppError> {
        let row = sqlx::query(
            "SELECT body FROM split_fares WHERE trip_id = ? AND cancelled = 0 LIMIT 1",
        )
        .bind(trip_id.to_string())
        .fetch_optional(&self.db)
        .await?;
        row.map(|row| from_json(&row.try_get::<String, _>("body")?))
            .transpose()
    }

    pub async fn append_chat(&self, message: &ChatMessage) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT OR IGNORE INTO chat_messages (trip_id, seq, sender_id, sender_role, body, sent_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.trip_id.to_string())
        .bind(message.seq as i64)
        .bind(message.sender_id.to_string())
        .bind(message.sender_role.as_str())
        .bind(&message.body)
        .bind(message.sent_at.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load_chat(&self, trip_id: Uuid) -> Result<Vec<ChatMessage>, AppError> {
        let rows = sqlx::query(
            r#"SELECT seq, sender_id, sender_role, body, sent_at
               FROM chat_messages WHERE trip_id = ? ORDER BY seq ASC"#,
        )
        .bind(trip_id.to_string())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|row| -> Result<ChatMessage, AppError> {
                let role: String = row.try_get("sender_role")?;
                Ok(ChatMessage {
                    trip_id,
                    seq: row.try_get::<i64, _>("seq")? as u64,
                    sender_id: parse_uuid(&row.try_get::<String, _>("sender_id")?)?,
                    sender_role: PartyRole::parse(&role).ok_or_else(|| {
                        AppError::Other(anyhow::anyhow!("unknown sender role {role}"))
                    })?,
                    body: row.try_get("body")?,
                    sent_at: parse_time(&row.try_get::<String, _>("sent_at")?)?,
                })
            })
            .collect()
    }

    pub async fn append_location(
        &self,
        trip_id: Uuid,
        sample: &LocationSample,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO location_samples (trip_id, lat, lng, heading, speed, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(trip_id.to_string())
        .bind(sample.lat)
        .bind(sample.lng)
        .bind(sample.heading)
        .bind(sample.speed)
        .bind(sample.timestamp.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Persisted location trail of a trip, oldest first.
    pub async fn load_locations(&self, trip_id: Uuid) -> Result<Vec<LocationSample>, AppError> {
        let rows = sqlx::query(
            r#"SELECT lat, lng, heading, speed, recorded_at
               FROM location_samples WHERE trip_id = ? ORDER BY id ASC"#,
        )
        .bind(trip_id.to_string())
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|row| -> Result<LocationSample, AppError> {
                Ok(LocationSample {
                    lat: row.try_get("lat")?,
                    lng: row.try_get("lng")?,
                    heading: row.try_get("heading")?,
                    speed: row.try_get("speed")?,
                    timestamp: parse_time(&row.try_get::<String, _>("recorded_at")?)?,
                })
            })
            .collect()
    }

    pub async fn record_sos(&self, event: &SosEvent) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO sos_events (id, trip_id, party_id, body, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.trip_id.to_string())
        .bind(event.party_id.to_string())
        .bind(to_json(event)?)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn list_sos_events(&self, trip_id: Uuid) -> Result<Vec<SosEvent>, AppError> {
        let rows = sqlx::query("SELECT body FROM sos_events WHERE trip_id = ? ORDER BY created_at ASC")
            .bind(trip_id.to_string())
            .fetch_all(&self.db)
            .await?;
        rows.into_iter()
            .map(|row| from_json(&row.try_get::<String, _>("body")?))
            .collect()
    }

    pub async fn save_safety_check(&self, check: &SafetyCheck) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO safety_checks (id, trip_id, outcome, deadline, body)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   outcome = excluded.outcome,
                   body = excluded.body"#,
        )
        .bind(check.id.to_string())
        .bind(check.trip_id.to_string())
        .bind(check.outcome.as_str())
        .bind(check.deadline.to_rfc3339())
        .bind(to_json(check)?)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load_safety_check(&self, check_id: Uuid) -> Result<Option<SafetyCheck>, AppError> {
        let row = sqlx::query("SELECT body FROM safety_checks WHERE id = ?")
            .bind(check_id.to_string())
            .fetch_optional(&self.db)
            .await?;
        row.map(|row| from_json(&row.try_get::<String, _>("body")?))
            .transpose()
    }

    pub async fn armed_safety_checks(&self) -> Result<Vec<SafetyCheck>, AppError> {
        let rows = sqlx::query("SELECT body FROM safety_checks WHERE outcome = ? ORDER BY deadline ASC")
            .bind(SafetyOutcome::Pending.as_str())
            .fetch_all(&self.db)
            .await?;
        rows.into_iter()
            .map(|row| from_json(&row.try_get::<String, _>("body")?))
            .collect()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, AppError> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_uuid(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|err| AppError::Other(err.into()))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| AppError::Other(err.into()))
}
