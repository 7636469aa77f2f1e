use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        event::CoordinationEvent,
        party::{Party, PartyRole},
        split::{ParticipantRef, ParticipantStatus, SplitFare, SplitFareView, SplitParticipant},
        trip::TripStatus,
    },
    services::{
        coordination::CoordinationHub,
        locks::KeyedLocks,
        notify::{NotificationKind, NotificationTarget, Notifier},
        storage::StorageService,
        trips::TripService,
    },
};

#[derive(Debug, Clone, Deserialize)]
pub struct CustomShare {
    pub party: ParticipantRef,
    pub share: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SplitRequest {
    Equal { participants: Vec<ParticipantRef> },
    Custom { participants: Vec<CustomShare> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitResponse {
    Accept,
    Decline,
}

/// Equal shares rounded down to the cent; the leftover cents go to `initiator_index`.
pub fn allocate_equal(total: Decimal, n: usize, initiator_index: usize) -> Result<Vec<Decimal>, AppError> {
    if n == 0 || initiator_index >= n {
        return Err(AppError::BadRequest("no participants to split between".into()));
    }
    ensure_cents(total)?;
    let count = Decimal::from(n as u64);
    let share = (total / count).round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let remainder = total - share * count;
    let mut shares = vec![share; n];
    shares[initiator_index] += remainder;
    Ok(shares)
}

/// Caller-supplied shares must be whole cents and add up to `total` exactly.
pub fn check_custom(total: Decimal, shares: &[Decimal]) -> Result<(), AppError> {
    for share in shares {
        if *share < Decimal::ZERO {
            return Err(AppError::SplitMismatch("shares must not be negative".into()));
        }
        ensure_cents(*share)?;
    }
    let sum: Decimal = shares.iter().copied().sum();
    if sum != total {
        return Err(AppError::SplitMismatch(format!(
            "shares add up to {sum}, expected {total}"
        )));
    }
    Ok(())
}

fn ensure_cents(amount: Decimal) -> Result<(), AppError> {
    if amount.round_dp(2) != amount {
        return Err(AppError::SplitMismatch(format!(
            "{amount} is not a whole number of cents"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct SplitService {
    inner: Arc<SplitInner>,
}

struct SplitInner {
    storage: StorageService,
    trips: TripService,
    hub: CoordinationHub,
    notifier: Arc<dyn Notifier>,
    locks: KeyedLocks,
}

impl SplitService {
    pub fn new(
        storage: StorageService,
        trips: TripService,
        hub: CoordinationHub,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(SplitInner {
                storage,
                trips,
                hub,
                notifier,
                locks: KeyedLocks::new(),
            }),
        }
    }

    pub async fn create_split(
        &self,
        trip_id: Uuid,
        initiator: Party,
        total: Decimal,
        request: SplitRequest,
    ) -> Result<SplitFareView, AppError> {
        let trip = self.inner.trips.find(trip_id).await?;
        if initiator.role != PartyRole::Rider || trip.rider_id != initiator.id {
            return Err(AppError::Forbidden);
        }
        if !matches!(
            trip.status,
            TripStatus::Accepted | TripStatus::Arrived | TripStatus::Started | TripStatus::Completed
        ) {
            return Err(AppError::illegal(trip.status, "split fare"));
        }
        if total != trip.current_total() {
            return Err(AppError::SplitMismatch(format!(
                "split total {total} does not match trip fare {}",
                trip.current_total()
            )));
        }

        let me = ParticipantRef::Rider(initiator.id);
        let allocation: Vec<(ParticipantRef, Decimal)> = match request {
            SplitRequest::Equal { participants } => {
                let mut refs = participants;
                if !refs.contains(&me) {
                    refs.insert(0, me.clone());
                }
                check_distinct(&refs)?;
                let index = refs.iter().position(|r| *r == me).unwrap_or(0);
                let shares = allocate_equal(total, refs.len(), index)?;
                refs.into_iter().zip(shares).collect()
            }
            SplitRequest::Custom { participants } => {
                let mut entries: Vec<(ParticipantRef, Decimal)> =
                    participants.into_iter().map(|c| (c.party, c.share)).collect();
                if !entries.iter().any(|(r, _)| *r == me) {
                    entries.insert(0, (me.clone(), Decimal::ZERO));
                }
                let refs: Vec<_> = entries.iter().map(|(r, _)| r.clone()).collect();
                check_distinct(&refs)?;
                let shares: Vec<_> = entries.iter().map(|(_, s)| *s).collect();
                check_custom(total, &shares)?;
                entries
            }
        };

        let _guard = self.inner.locks.lock(trip_id).await;
        if self.inner.storage.open_split_for_trip(trip_id).await?.is_some() {
            return Err(AppError::illegal_state("split open", "split fare"));
        }
        let split = SplitFare {
            id: Uuid::new_v4(),
            trip_id,
            initiator: initiator.id,
            total,
            participants: allocation
                .into_iter()
                .map(|(party, share)| SplitParticipant {
                    id: Uuid::new_v4(),
                    party,
                    share,
                    status: ParticipantStatus::Pending,
                    paid_at: None,
                })
                .collect(),
            created_at: Utc::now(),
            cancelled_at: None,
        };
        debug_assert_eq!(split.shares_total(), split.total);
        self.inner.storage.save_split(&split).await?;
        info!(split_id = %split.id, trip_id = %trip_id, participants = split.participants.len(), total = %total, "split fare created");

        for participant in &split.participants {
            if let ParticipantRef::Rider(rider_id) = participant.party {
                if rider_id != initiator.id {
                    self.inner
                        .notifier
                        .notify(
                            NotificationTarget::Party(rider_id),
                            NotificationKind::SplitFareRequested,
                            json!({ "split_id": split.id, "trip_id": trip_id, "share": participant.share }),
                        )
                        .await;
                }
            }
        }
        Ok(self.publish(&split).await)
    }

    pub async fn get_split(&self, split_id: Uuid, viewer: Party) -> Result<SplitFareView, AppError> {
        let split = self.load(split_id).await?;
        let visible = viewer.role == PartyRole::System
            || split.initiator == viewer.id
            || split
                .participants
                .iter()
                .any(|p| p.party == ParticipantRef::Rider(viewer.id));
        if !visible {
            return Err(AppError::Forbidden);
        }
        Ok(split.view())
    }

    /// Accept or decline a pending share. External contacts answer through the initiator.
    pub async fn respond(
        &self,
        split_id: Uuid,
        participant_id: Uuid,
        responder: Party,
        response: SplitResponse,
    ) -> Result<SplitFareView, AppError> {
        let _guard = self.inner.locks.lock(split_id).await;
        let mut split = self.load(split_id).await?;
        if split.cancelled_at.is_some() {
            return Err(AppError::illegal_state("cancelled", "respond to split"));
        }
        let initiator = split.initiator;
        let participant = split
            .participant_mut(participant_id)
            .ok_or(AppError::NotFound)?;
        let allowed = match &participant.party {
            ParticipantRef::Rider(id) => *id == responder.id,
            ParticipantRef::Contact(_) => responder.id == initiator,
        };
        if !allowed {
            return Err(AppError::Forbidden);
        }
        if participant.status != ParticipantStatus::Pending {
            return Err(AppError::illegal_state(
                format!("{:?}", participant.status).to_lowercase(),
                "respond to split",
            ));
        }
        participant.status = match response {
            SplitResponse::Accept => ParticipantStatus::Accepted,
            SplitResponse::Decline => ParticipantStatus::Declined,
        };
        self.inner.storage.save_split(&split).await?;
        info!(split_id = %split_id, participant_id = %participant_id, ?response, "split response recorded");
        Ok(self.publish(&split).await)
    }

    /// Records a payment for one share. The payment collaborator reports as `system`.
    pub async fn mark_paid(
        &self,
        split_id: Uuid,
        participant_id: Uuid,
        payer: Party,
    ) -> Result<SplitFareView, AppError> {
        let _guard = self.inner.locks.lock(split_id).await;
        let mut split = self.load(split_id).await?;
        if split.cancelled_at.is_some() {
            return Err(AppError::illegal_state("cancelled", "pay split share"));
        }
        let initiator = split.initiator;
        let participant = split
            .participant_mut(participant_id)
            .ok_or(AppError::NotFound)?;
        let allowed = payer.role == PartyRole::System
            || payer.id == initiator
            || participant.party == ParticipantRef::Rider(payer.id);
        if !allowed {
            return Err(AppError::Forbidden);
        }
        if !matches!(
            participant.status,
            ParticipantStatus::Pending | ParticipantStatus::Accepted
        ) {
            return Err(AppError::illegal_state(
                format!("{:?}", participant.status).to_lowercase(),
                "pay split share",
            ));
        }
        participant.status = ParticipantStatus::Paid;
        participant.paid_at = Some(Utc::now());
        self.inner.storage.save_split(&split).await?;
        info!(split_id = %split_id, participant_id = %participant_id, status = ?split.status(), "split share paid");
        Ok(self.publish(&split).await)
    }

    pub async fn cancel_split(&self, split_id: Uuid, actor: Party) -> Result<SplitFareView, AppError> {
        let _guard = self.inner.locks.lock(split_id).await;
        let mut split = self.load(split_id).await?;
        if actor.id != split.initiator {
            return Err(AppError::Forbidden);
        }
        if split.cancelled_at.is_some() {
            return Err(AppError::illegal_state("cancelled", "cancel split"));
        }
        if split.any_paid() {
            return Err(AppError::SplitAlreadySettled);
        }
        split.cancelled_at = Some(Utc::now());
        self.inner.storage.save_split(&split).await?;
        info!(split_id = %split_id, "split fare cancelled");
        Ok(self.publish(&split).await)
    }

    async fn load(&self, split_id: Uuid) -> Result<SplitFare, AppError> {
        self.inner
            .storage
            .load_split(split_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    async fn publish(&self, split: &SplitFare) -> SplitFareView {
        let view = split.view();
        self.inner
            .hub
            .publish(
                split.trip_id,
                CoordinationEvent::SplitFareUpdated {
                    trip_id: split.trip_id,
                    split: Box::new(view.clone()),
                },
            )
            .await;
        view
    }
}

fn check_distinct(refs: &[ParticipantRef]) -> Result<(), AppError> {
    if refs.len() < 2 {
        return Err(AppError::BadRequest(
            "a split needs at least two participants".into(),
        ));
    }
    let mut seen = HashSet::new();
    if refs.iter().all(|r| seen.insert(r)) {
        Ok(())
    } else {
        Err(AppError::BadRequest("participants must be distinct".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn nineteen_ten_between_three() {
        let shares = allocate_equal(dec!(19.10), 3, 0).expect("allocate");
        assert_eq!(shares, vec![dec!(6.38), dec!(6.36), dec!(6.36)]);
        assert_eq!(shares.iter().copied().sum::<Decimal>(), dec!(19.10));
    }

    #[test]
    fn remainder_lands_on_initiator_wherever_they_are() {
        let shares = allocate_equal(dec!(10.00), 3, 2).expect("allocate");
        assert_eq!(shares, vec![dec!(3.33), dec!(3.33), dec!(3.34)]);
    }

    #[test]
    fn equal_shares_always_sum_to_total() {
        for cents in [1_i64, 99, 100, 1001, 1910, 12345, 99999] {
            let total = Decimal::new(cents, 2);
            for n in 1..=9 {
                let shares = allocate_equal(total, n, n - 1).expect("allocate");
                assert_eq!(shares.iter().copied().sum::<Decimal>(), total, "{total} / {n}");
                let spread = shares[n - 1] - shares[0];
                assert!(spread < Decimal::new(n as i64, 2));
            }
        }
    }

    #[test]
    fn custom_shares_must_match_exactly() {
        assert!(check_custom(dec!(20.00), &[dec!(10.00), dec!(10.00)]).is_ok());
        assert!(matches!(
            check_custom(dec!(20.00), &[dec!(10.00), dec!(9.99)]),
            Err(AppError::SplitMismatch(_))
        ));
        assert!(matches!(
            check_custom(dec!(20.00), &[dec!(10.005), dec!(9.995)]),
            Err(AppError::SplitMismatch(_))
        ));
    }

    #[test]
    fn duplicates_and_singletons_are_rejected() {
        let a = ParticipantRef::Contact("a@example.com".into());
        assert!(check_distinct(&[a.clone()]).is_err());
        assert!(check_distinct(&[a.clone(), a]).is_err());
    }
}
