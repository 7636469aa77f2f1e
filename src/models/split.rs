use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParticipantRef {
    Rider(Uuid),
    Contact(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Pending,
    Accepted,
    Declined,
    Paid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SplitStatus {
    Pending,
    Partial,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitParticipant {
    pub id: Uuid,
    pub party: ParticipantRef,
    pub share: Decimal,
    pub status: ParticipantStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitFare {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub initiator: Uuid,
    pub total: Decimal,
    pub participants: Vec<SplitParticipant>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl SplitFare {
    /// Aggregate status, always derived from participant state.
    pub fn status(&self) -> SplitStatus {
        if self.cancelled_at.is_some() {
            return SplitStatus::Cancelled;
        }
        let owing: Vec<_> = self
            .participants
            .iter()
            .filter(|p| p.status != ParticipantStatus::Declined)
            .collect();
        let paid = owing
            .iter()
            .filter(|p| p.status == ParticipantStatus::Paid)
            .count();
        if owing.is_empty() || paid == 0 {
            SplitStatus::Pending
        } else if paid == owing.len() {
            SplitStatus::Completed
        } else {
            SplitStatus::Partial
        }
    }

    pub fn any_paid(&self) -> bool {
        self.participants
            .iter()
            .any(|p| p.status == ParticipantStatus::Paid)
    }

    pub fn shares_total(&self) -> Decimal {
        self.participants.iter().map(|p| p.share).sum()
    }

    pub fn participant_mut(&mut self, participant_id: Uuid) -> Option<&mut SplitParticipant> {
        self.participants.iter_mut().find(|p| p.id == participant_id)
    }

    pub fn view(&self) -> SplitFareView {
        SplitFareView {
            status: self.status(),
            split: self.clone(),
        }
    }
}

/// A split together with its derived status, as handed to callers and sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitFareView {
    #[serde(flatten)]
    pub split: SplitFare,
    pub status: SplitStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn participant(status: ParticipantStatus) -> SplitParticipant {
        SplitParticipant {
            id: Uuid::new_v4(),
            party: ParticipantRef::Contact("friend@example.com".into()),
            share: dec!(5.00),
            status,
            paid_at: None,
        }
    }

    fn split(statuses: &[ParticipantStatus]) -> SplitFare {
        SplitFare {
            id: Uuid::new_v4(),
            trip_id: Uuid::new_v4(),
            initiator: Uuid::new_v4(),
            total: dec!(5.00) * Decimal::from(statuses.len()),
            participants: statuses.iter().copied().map(participant).collect(),
            created_at: Utc::now(),
            cancelled_at: None,
        }
    }

    #[test]
    fn status_is_derived_from_participants() {
        use ParticipantStatus::*;
        assert_eq!(split(&[Pending, Accepted]).status(), SplitStatus::Pending);
        assert_eq!(split(&[Paid, Accepted]).status(), SplitStatus::Partial);
        assert_eq!(split(&[Paid, Declined]).status(), SplitStatus::Completed);
        assert_eq!(split(&[Declined, Declined]).status(), SplitStatus::Pending);
    }

    #[test]
    fn cancellation_overrides_participant_state() {
        let mut s = split(&[ParticipantStatus::Accepted]);
        s.cancelled_at = Some(Utc::now());
        assert_eq!(s.status(), SplitStatus::Cancelled);
    }
}
