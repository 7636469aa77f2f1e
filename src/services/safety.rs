use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::SafetySettings,
    error::AppError,
    models::{
        event::CoordinationEvent,
        party::{Party, PartyRole},
        safety::{SafetyCheck, SafetyOutcome, SuspicionKind},
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

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ArmOutcome {
    Armed { check: SafetyCheck },
    AlreadyArmed { check_id: Uuid },
    CoolingDown { until: DateTime<Utc> },
}

struct ActiveCheck {
    check: SafetyCheck,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct TripSafety {
    active: Option<ActiveCheck>,
    last_resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SafetyService {
    inner: Arc<SafetyInner>,
}

struct SafetyInner {
    settings: SafetySettings,
    storage: StorageService,
    trips: TripService,
    hub: CoordinationHub,
    notifier: Arc<dyn Notifier>,
    locks: KeyedLocks,
    state: Mutex<HashMap<Uuid, TripSafety>>,
}

impl SafetyService {
    pub fn new(
        settings: SafetySettings,
        storage: StorageService,
        trips: TripService,
        hub: CoordinationHub,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let locks = trips.trip_locks();
        Self {
            inner: Arc::new(SafetyInner {
                settings,
                storage,
                trips,
                hub,
                notifier,
                locks,
                state: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, TripSafety>) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    pub fn active_check(&self, trip_id: Uuid) -> Option<SafetyCheck> {
        self.with_state(|state| {
            state
                .get(&trip_id)
                .and_then(|s| s.active.as_ref())
                .map(|a| a.check.clone())
        })
    }

    /// Called by the suspicion heuristics. Suppressed signals are not errors.
    pub async fn signal_suspicion(
        &self,
        trip_id: Uuid,
        reason: SuspicionKind,
    ) -> Result<ArmOutcome, AppError> {
        let _guard = self.inner.locks.lock(trip_id).await;
        let trip = self.inner.trips.find(trip_id).await?;
        if trip.status != TripStatus::Started {
            return Err(AppError::illegal(trip.status, "arm safety check"));
        }

        let now = Utc::now();
        let cooldown = chrono::Duration::from_std(self.inner.settings.cooldown)
            .map_err(|err| AppError::Config(format!("safety cooldown: {err}")))?;
        let suppressed = self.with_state(|state| {
            let entry = state.get(&trip_id)?;
            if let Some(active) = &entry.active {
                return Some(ArmOutcome::AlreadyArmed {
                    check_id: active.check.id,
                });
            }
            entry
                .last_resolved_at
                .map(|at| at + cooldown)
                .filter(|until| *until > now)
                .map(|until| ArmOutcome::CoolingDown { until })
        });
        if let Some(outcome) = suppressed {
            debug!(trip_id = %trip_id, ?reason, "suspicion signal suppressed");
            return Ok(outcome);
        }

        let window = chrono::Duration::from_std(self.inner.settings.window)
            .map_err(|err| AppError::Config(format!("safety window: {err}")))?;
        let check = SafetyCheck {
            id: Uuid::new_v4(),
            trip_id,
            rider_id: trip.rider_id,
            reason,
            armed_at: now,
            deadline: now + window,
            outcome: SafetyOutcome::Pending,
            resolved_at: None,
        };
        self.inner.storage.save_safety_check(&check).await?;
        self.install(check.clone());
        warn!(trip_id = %trip_id, check_id = %check.id, ?reason, deadline = %check.deadline, "safety check armed");

        self.challenge(check.clone()).await;
        Ok(ArmOutcome::Armed { check })
    }

    async fn challenge(&self, check: SafetyCheck) {
        let trip_id = check.trip_id;
        self.inner
            .hub
            .send_to(
                trip_id,
                PartyRole::Rider,
                CoordinationEvent::SafetyCheckArmed { trip_id, check },
            )
            .await;
    }

    /// Repeats the pending challenge to a rider who has just (re)subscribed.
    pub async fn resend_challenge(&self, trip_id: Uuid) {
        if let Some(check) = self.active_check(trip_id) {
            debug!(trip_id = %trip_id, check_id = %check.id, "safety challenge re-sent");
            self.challenge(check).await;
        }
    }

    /// Registers an armed check and starts its timer. Caller holds the trip lock.
    fn install(&self, check: SafetyCheck) {
        let trip_id = check.trip_id;
        let timer = self.spawn_timer(trip_id, check.id, check.deadline);
        self.with_state(|state| {
            state.entry(trip_id).or_default().active = Some(ActiveCheck {
                check,
                timer,
            });
        });
    }

    fn spawn_timer(&self, trip_id: Uuid, check_id: Uuid, deadline: DateTime<Utc>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                let remaining = deadline - Utc::now();
                match remaining.to_std() {
                    Ok(wait) if !wait.is_zero() => tokio::time::sleep(wait).await,
                    _ => break,
                }
            }
            if let Err(err) = service.expire(trip_id, check_id).await {
                error!(trip_id = %trip_id, check_id = %check_id, error = %err, "safety escalation failed");
            }
        })
    }

    /// The rider answers the challenge.
    pub async fn confirm_safe(&self, trip_id: Uuid, rider: Party) -> Result<SafetyCheck, AppError> {
        let _guard = self.inner.locks.lock(trip_id).await;
        let trip = self.inner.trips.find(trip_id).await?;
        if rider.role != PartyRole::Rider || trip.rider_id != rider.id {
            return Err(AppError::Forbidden);
        }
        let deadline = self
            .active_check(trip_id)
            .map(|check| check.deadline)
            .ok_or_else(|| AppError::illegal_state("no armed safety check", "confirm safe"))?;
        // Past the deadline the timer owns the check and will escalate it.
        if Utc::now() >= deadline {
            return Err(AppError::illegal_state("safety check expired", "confirm safe"));
        }
        let check = self
            .take_active(trip_id, None)
            .ok_or_else(|| AppError::illegal_state("no armed safety check", "confirm safe"))?;
        let check = self.resolve(check, SafetyOutcome::ConfirmedSafe).await?;
        info!(trip_id = %trip_id, check_id = %check.id, "rider confirmed safe");
        Ok(check)
    }

    /// Timer path. A no-op unless `check_id` is still the armed check. A check
    /// whose trip has already ended is dismissed rather than escalated.
    async fn expire(&self, trip_id: Uuid, check_id: Uuid) -> Result<(), AppError> {
        let _guard = self.inner.locks.lock(trip_id).await;
        let trip_ended = match self.trip_ended(trip_id).await {
            Ok(ended) => ended,
            Err(err) => {
                warn!(trip_id = %trip_id, error = %err, "trip status unknown at deadline");
                false
            }
        };
        let Some(check) = self.take_active(trip_id, Some(check_id)) else {
            debug!(trip_id = %trip_id, check_id = %check_id, "timer fired for resolved check");
            return Ok(());
        };
        if trip_ended {
            self.resolve(check, SafetyOutcome::Dismissed).await?;
            self.with_state(|state| {
                state.remove(&trip_id);
            });
            info!(trip_id = %trip_id, check_id = %check_id, "armed check dismissed at deadline, trip ended");
            return Ok(());
        }
        self.escalate(check).await
    }

    async fn trip_ended(&self, trip_id: Uuid) -> Result<bool, AppError> {
        match self.inner.trips.find(trip_id).await {
            Ok(trip) => Ok(trip.status.is_terminal()),
            Err(AppError::NotFound) => Ok(true),
            Err(err) => Err(err),
        }
    }

    async fn escalate(&self, check: SafetyCheck) -> Result<(), AppError> {
        let check = self.resolve(check, SafetyOutcome::Escalated).await?;
        error!(trip_id = %check.trip_id, check_id = %check.id, rider_id = %check.rider_id, "safety check escalated");

        let location = match self.inner.storage.load_locations(check.trip_id).await {
            Ok(trail) => trail.last().map(|sample| sample.coordinates()),
            Err(err) => {
                warn!(trip_id = %check.trip_id, error = %err, "could not load last location");
                None
            }
        };
        let payload = json!({
            "check_id": check.id,
            "trip_id": check.trip_id,
            "rider_id": check.rider_id,
            "reason": check.reason,
            "location": location,
            "timestamp": check.deadline,
        });
        self.inner
            .notifier
            .notify(
                NotificationTarget::EmergencyContactsOf(check.rider_id),
                NotificationKind::SafetyEscalated,
                payload.clone(),
            )
            .await;
        self.inner
            .notifier
            .notify(
                NotificationTarget::Support,
                NotificationKind::SupportCallbackRequested,
                payload,
            )
            .await;
        Ok(())
    }

    /// Removes the armed check for `trip_id` (optionally only if it is `expected`)
    /// and stops its timer unless we are running on it.
    fn take_active(&self, trip_id: Uuid, expected: Option<Uuid>) -> Option<SafetyCheck> {
        let active = self.with_state(|state| {
            let entry = state.get_mut(&trip_id)?;
            if expected.is_some_and(|id| entry.active.as_ref().map(|a| a.check.id) != Some(id)) {
                return None;
            }
            entry.active.take()
        })?;
        if expected.is_none() {
            active.timer.abort();
        }
        Some(active.check)
    }

    async fn resolve(&self, mut check: SafetyCheck, outcome: SafetyOutcome) -> Result<SafetyCheck, AppError> {
        let now = Utc::now();
        check.outcome = outcome;
        check.resolved_at = Some(now);
        self.with_state(|state| {
            state.entry(check.trip_id).or_default().last_resolved_at = Some(now);
        });
        self.inner.storage.save_safety_check(&check).await?;
        self.inner
            .hub
            .publish(
                check.trip_id,
                CoordinationEvent::SafetyCheckResolved {
                    trip_id: check.trip_id,
                    check_id: check.id,
                    outcome,
                },
            )
            .await;
        Ok(check)
    }

    /// The trip ended: drop any armed check and forget cool-down state.
    pub async fn dismiss(&self, trip_id: Uuid) -> Result<(), AppError> {
        let _guard = self.inner.locks.lock(trip_id).await;
        if let Some(check) = self.take_active(trip_id, None) {
            self.resolve(check, SafetyOutcome::Dismissed).await?;
            info!(trip_id = %trip_id, "armed safety check dismissed, trip ended");
        }
        self.with_state(|state| {
            state.remove(&trip_id);
        });
        Ok(())
    }

    /// Reloads checks that were armed when the process stopped. Overdue checks
    /// escalate immediately, the rest are re-timed.
    pub async fn restore(&self) -> Result<usize, AppError> {
        let armed = self.inner.storage.armed_safety_checks().await?;
        let count = armed.len();
        for check in armed {
            let trip_id = check.trip_id;
            let _guard = self.inner.locks.lock(trip_id).await;
            if self.trip_ended(trip_id).await? {
                self.resolve(check, SafetyOutcome::Dismissed).await?;
            } else if Utc::now() >= check.deadline {
                warn!(trip_id = %trip_id, check_id = %check.id, "armed check overdue after restart");
                self.escalate(check).await?;
            } else {
                info!(trip_id = %trip_id, check_id = %check.id, deadline = %check.deadline, "armed check re-timed");
                self.install(check);
            }
        }
        Ok(count)
    }

    /// Dismisses whatever is tracked for trips that have ended. Used when trip
    /// events may have been missed.
    pub async fn sweep_ended_trips(&self) {
        let tracked: Vec<Uuid> = self.with_state(|state| state.keys().copied().collect());
        for trip_id in tracked {
            match self.trip_ended(trip_id).await {
                Ok(true) => {
                    if let Err(err) = self.dismiss(trip_id).await {
                        warn!(trip_id = %trip_id, error = %err, "failed to dismiss safety check");
                    }
                }
                Ok(false) => {}
                Err(err) => warn!(trip_id = %trip_id, error = %err, "could not check trip status"),
            }
        }
    }

    /// Watches trip events and dismisses checks on trips that reach a terminal state.
    pub fn spawn_trip_listener(&self) -> JoinHandle<()> {
        let service = self.clone();
        let mut events = self.inner.hub.tap();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(CoordinationEvent::TripStatusChanged { trip_id, status, .. })
                        if status.is_terminal() =>
                    {
                        if let Err(err) = service.dismiss(trip_id).await {
                            warn!(trip_id = %trip_id, error = %err, "failed to dismiss safety check");
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "safety listener lagged behind trip events");
                        service.sweep_ended_trips().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
