use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Instant,
};

use chrono::Utc;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ChannelSettings,
    error::AppError,
    models::{
        event::{ChatMessage, CoordinationEvent, LocationSample, SosEvent},
        party::{Party, PartyRole},
        session::SessionInfo,
        trip::Coordinates,
    },
    services::{
        notify::{NotificationKind, NotificationTarget, Notifier},
        storage::StorageService,
    },
};

const MAX_CHAT_LEN: usize = 2000;
const TAP_CAPACITY: usize = 256;

/// What a session's transport task receives.
#[derive(Debug, Clone)]
pub enum SessionFrame {
    Event(CoordinationEvent),
    /// The hub has dropped this session; the transport should close.
    Close,
}

/// Returned from [`CoordinationHub::connect`]; the transport drains `frames`.
#[derive(Debug)]
pub struct SessionLink {
    pub session_id: Uuid,
    pub party: Party,
    pub frames: mpsc::UnboundedReceiver<SessionFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationRelay {
    Forwarded,
    /// Arrived faster than the configured minimum interval.
    Dropped,
}

struct SessionEntry {
    party: Party,
    tx: mpsc::UnboundedSender<SessionFrame>,
    subscriptions: HashSet<Uuid>,
    connected_at: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct SessionRegistry {
    by_id: HashMap<Uuid, SessionEntry>,
    by_party: HashMap<Uuid, Uuid>,
}

#[derive(Clone)]
struct Slot {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<SessionFrame>,
}

impl Slot {
    /// Send failures mean the session is gone; the frame is dropped here and
    /// chat is recovered through replay on resubscribe.
    fn deliver(&self, event: CoordinationEvent) {
        if self.tx.send(SessionFrame::Event(event)).is_err() {
            debug!(session_id = %self.session_id, "dropping frame for closed session");
        }
    }
}

#[derive(Default)]
struct TripChannel {
    rider: Option<Slot>,
    driver: Option<Slot>,
    last_seq: u64,
    chat: Vec<ChatMessage>,
    last_location: Option<LocationSample>,
    last_relayed_at: Option<Instant>,
    last_persisted_at: Option<Instant>,
    /// Set once the trip is terminal; the channel is dropped when its last slot empties.
    retired: bool,
}

impl TripChannel {
    fn slot_mut(&mut self, role: PartyRole) -> Option<&mut Option<Slot>> {
        match role {
            PartyRole::Rider => Some(&mut self.rider),
            PartyRole::Driver => Some(&mut self.driver),
            PartyRole::System => None,
        }
    }

    fn holds(&self, session_id: Uuid) -> Option<PartyRole> {
        if self.rider.as_ref().is_some_and(|s| s.session_id == session_id) {
            Some(PartyRole::Rider)
        } else if self.driver.as_ref().is_some_and(|s| s.session_id == session_id) {
            Some(PartyRole::Driver)
        } else {
            None
        }
    }

    fn release(&mut self, session_id: Uuid) {
        if self.rider.as_ref().is_some_and(|s| s.session_id == session_id) {
            self.rider = None;
        }
        if self.driver.as_ref().is_some_and(|s| s.session_id == session_id) {
            self.driver = None;
        }
    }

    fn is_idle(&self) -> bool {
        self.rider.is_none() && self.driver.is_none()
    }

    fn broadcast(&self, event: &CoordinationEvent) {
        for slot in [&self.rider, &self.driver].into_iter().flatten() {
            slot.deliver(event.clone());
        }
    }
}

#[derive(Clone)]
pub struct CoordinationHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    settings: ChannelSettings,
    storage: StorageService,
    notifier: Arc<dyn Notifier>,
    sessions: Mutex<SessionRegistry>,
    shards: Vec<AsyncMutex<HashMap<Uuid, TripChannel>>>,
    tap: broadcast::Sender<CoordinationEvent>,
}

impl CoordinationHub {
    pub fn new(
        settings: ChannelSettings,
        storage: StorageService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let shard_count = settings.shards.max(1);
        let shards = (0..shard_count)
            .map(|_| AsyncMutex::new(HashMap::new()))
            .collect();
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                settings,
                storage,
                notifier,
                sessions: Mutex::new(SessionRegistry::default()),
                shards,
                tap,
            }),
        }
    }

    pub fn tap(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.inner.tap.subscribe()
    }

    fn shard(&self, trip_id: Uuid) -> &AsyncMutex<HashMap<Uuid, TripChannel>> {
        let index = (trip_id.as_u128() % self.inner.shards.len() as u128) as usize;
        &self.inner.shards[index]
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, SessionRegistry>, AppError> {
        self.inner
            .sessions
            .lock()
            .map_err(|_| AppError::Other(anyhow::anyhow!("session registry lock poisoned")))
    }

    /// Registers a new session. An existing session of the same party is
    /// superseded: it gets a `session_superseded` event and is closed.
    pub async fn connect(&self, party: Party) -> Result<SessionLink, AppError> {
        if party.role == PartyRole::System {
            return Err(AppError::Forbidden);
        }
        let session_id = Uuid::new_v4();
        let (tx, frames) = mpsc::unbounded_channel();

        let superseded = {
            let mut registry = self.registry()?;
            let old_id = registry.by_party.insert(party.id, session_id);
            let previous =
                old_id.and_then(|old_id| registry.by_id.remove(&old_id).map(|entry| (old_id, entry)));
            registry.by_id.insert(
                session_id,
                SessionEntry {
                    party,
                    tx,
                    subscriptions: HashSet::new(),
                    connected_at: Utc::now(),
                },
            );
            previous
        };

        if let Some((old_id, old)) = superseded {
            warn!(party_id = %party.id, old_session = %old_id, new_session = %session_id, "session superseded");
            let _ = old
                .tx
                .send(SessionFrame::Event(CoordinationEvent::SessionSuperseded));
            let _ = old.tx.send(SessionFrame::Close);
            self.release_slots(old_id, &old.subscriptions).await;
        }

        info!(party_id = %party.id, role = %party.role, session_id = %session_id, "session connected");
        Ok(SessionLink {
            session_id,
            party,
            frames,
        })
    }

    /// Drops a session. Trips and armed safety checks are unaffected.
    pub async fn disconnect(&self, session_id: Uuid) -> Result<(), AppError> {
        let removed = {
            let mut registry = self.registry()?;
            let removed = registry.by_id.remove(&session_id);
            if let Some(entry) = &removed {
                if registry.by_party.get(&entry.party.id) == Some(&session_id) {
                    registry.by_party.remove(&entry.party.id);
                }
            }
            removed
        };
        if let Some(entry) = removed {
            self.release_slots(session_id, &entry.subscriptions).await;
            info!(session_id = %session_id, party_id = %entry.party.id, "session disconnected");
        }
        Ok(())
    }

    async fn release_slots(&self, session_id: Uuid, trips: &HashSet<Uuid>) {
        for trip_id in trips {
            self.release_slot(session_id, *trip_id).await;
        }
    }

    async fn release_slot(&self, session_id: Uuid, trip_id: Uuid) {
        let mut shard = self.shard(trip_id).lock().await;
        let drop_channel = match shard.get_mut(&trip_id) {
            Some(channel) => {
                channel.release(session_id);
                channel.retired && channel.is_idle()
            }
            None => false,
        };
        if drop_channel {
            shard.remove(&trip_id);
            debug!(trip_id = %trip_id, "retired trip channel dropped");
        }
    }

    pub fn session_info(&self, session_id: Uuid) -> Option<SessionInfo> {
        let registry = self.registry().ok()?;
        registry.by_id.get(&session_id).map(|entry| SessionInfo {
            id: session_id,
            party: entry.party,
            connected_at: entry.connected_at,
            subscriptions: entry.subscriptions.iter().copied().collect(),
        })
    }

    fn live_session(&self, session_id: Uuid) -> Result<(Party, mpsc::UnboundedSender<SessionFrame>), AppError> {
        let registry = self.registry()?;
        registry
            .by_id
            .get(&session_id)
            .map(|entry| (entry.party, entry.tx.clone()))
            .ok_or(AppError::SessionSuperseded)
    }

    /// Puts the session into its party's slot on `trip_id` and replays missed chat.
    ///
    /// Membership (rider of the trip, or its assigned driver) is checked by the
    /// caller; the hub itself knows nothing about trips.
    pub async fn subscribe(
        &self,
        session_id: Uuid,
        trip_id: Uuid,
        last_seen_seq: Option<u64>,
    ) -> Result<u64, AppError> {
        let (party, _) = self.live_session(session_id)?;

        let last_seq = {
            let mut shard = self.shard(trip_id).lock().await;
            let created = !shard.contains_key(&trip_id);
            if created {
                let chat = self.inner.storage.load_chat(trip_id).await?;
                shard.insert(
                    trip_id,
                    TripChannel {
                        last_seq: chat.last().map(|m| m.seq).unwrap_or(0),
                        chat,
                        ..TripChannel::default()
                    },
                );
            }

            // The session can be superseded or closed while chat loads. Its
            // subscription is recorded under the shard lock so a later disconnect
            // always finds and releases the slot.
            let tx = {
                let mut registry = self.registry()?;
                registry.by_id.get_mut(&session_id).map(|entry| {
                    entry.subscriptions.insert(trip_id);
                    entry.tx.clone()
                })
            };
            let Some(tx) = tx else {
                if created {
                    shard.remove(&trip_id);
                }
                return Err(AppError::SessionSuperseded);
            };

            let channel = shard
                .get_mut(&trip_id)
                .ok_or_else(|| AppError::Other(anyhow::anyhow!("trip channel vanished")))?;
            let slot = Slot { session_id, tx };
            let target = channel.slot_mut(party.role).ok_or(AppError::Forbidden)?;
            *target = Some(slot.clone());

            slot.deliver(CoordinationEvent::Subscribed {
                trip_id,
                last_seq: channel.last_seq,
            });
            let after = last_seen_seq.unwrap_or(0);
            for message in channel.chat.iter().filter(|m| m.seq > after) {
                slot.deliver(CoordinationEvent::ChatMessageReceived {
                    message: message.clone(),
                });
            }
            if party.role == PartyRole::Rider {
                if let Some(sample) = channel.last_location {
                    slot.deliver(CoordinationEvent::DriverLocationUpdated { trip_id, sample });
                }
            }
            channel.last_seq
        };

        debug!(session_id = %session_id, trip_id = %trip_id, last_seq, "session subscribed");
        Ok(last_seq)
    }

    pub async fn unsubscribe(&self, session_id: Uuid, trip_id: Uuid) -> Result<(), AppError> {
        self.release_slot(session_id, trip_id).await;
        if let Some(entry) = self.registry()?.by_id.get_mut(&session_id) {
            entry.subscriptions.remove(&trip_id);
        }
        Ok(())
    }

    /// Relays a driver location sample to the rider. Excess samples are dropped.
    pub async fn relay_location(
        &self,
        session_id: Uuid,
        trip_id: Uuid,
        sample: LocationSample,
    ) -> Result<LocationRelay, AppError> {
        if !sample.coordinates().is_valid() {
            return Err(AppError::BadRequest("location out of range".into()));
        }
        let now = Instant::now();
        let event = CoordinationEvent::DriverLocationUpdated { trip_id, sample };

        let mut shard = self.shard(trip_id).lock().await;
        let channel = shard.get_mut(&trip_id).ok_or(AppError::NotSubscribed)?;
        if channel.holds(session_id) != Some(PartyRole::Driver) {
            return Err(AppError::NotSubscribed);
        }
        if channel
            .last_relayed_at
            .is_some_and(|at| now.duration_since(at) < self.inner.settings.location_min_interval)
        {
            debug!(trip_id = %trip_id, "location sample rate-limited");
            return Ok(LocationRelay::Dropped);
        }
        channel.last_relayed_at = Some(now);
        channel.last_location = Some(sample);
        if let Some(rider) = &channel.rider {
            rider.deliver(event.clone());
        }

        let persist = channel.last_persisted_at.map_or(true, |at| {
            now.duration_since(at) >= self.inner.settings.location_persist_interval
        });
        if persist {
            channel.last_persisted_at = Some(now);
            if let Err(err) = self.inner.storage.append_location(trip_id, &sample).await {
                warn!(trip_id = %trip_id, error = %err, "failed to persist location sample");
            }
        }
        drop(shard);

        let _ = self.inner.tap.send(event);
        Ok(LocationRelay::Forwarded)
    }

    /// Assigns the next per-trip sequence number, persists and relays to both sides.
    pub async fn send_chat(
        &self,
        session_id: Uuid,
        trip_id: Uuid,
        body: String,
    ) -> Result<ChatMessage, AppError> {
        if body.trim().is_empty() {
            return Err(AppError::BadRequest("chat message is empty".into()));
        }
        if body.chars().count() > MAX_CHAT_LEN {
            return Err(AppError::BadRequest(format!(
                "chat message exceeds {MAX_CHAT_LEN} characters"
            )));
        }
        let (party, _) = self.live_session(session_id)?;

        let mut shard = self.shard(trip_id).lock().await;
        let channel = shard.get_mut(&trip_id).ok_or(AppError::NotSubscribed)?;
        let role = channel.holds(session_id).ok_or(AppError::NotSubscribed)?;
        let message = ChatMessage {
            trip_id,
            seq: channel.last_seq + 1,
            sender_id: party.id,
            sender_role: role,
            body,
            sent_at: Utc::now(),
        };
        self.inner.storage.append_chat(&message).await?;
        channel.last_seq = message.seq;
        channel.chat.push(message.clone());

        let event = CoordinationEvent::ChatMessageReceived {
            message: message.clone(),
        };
        channel.broadcast(&event);
        drop(shard);

        let _ = self.inner.tap.send(event);
        Ok(message)
    }

    /// Relays an SOS to operations and the rider's emergency contacts and
    /// acknowledges it to the caller. Trip state is not touched.
    pub async fn raise_sos(
        &self,
        session_id: Uuid,
        trip_id: Uuid,
        rider_id: Uuid,
        location: Coordinates,
    ) -> Result<SosEvent, AppError> {
        if !location.is_valid() {
            return Err(AppError::BadRequest("location out of range".into()));
        }
        let (party, tx) = self.live_session(session_id)?;
        {
            let shard = self.shard(trip_id).lock().await;
            let holds = shard
                .get(&trip_id)
                .and_then(|channel| channel.holds(session_id));
            if holds.is_none() {
                return Err(AppError::NotSubscribed);
            }
        }

        let event = SosEvent {
            id: Uuid::new_v4(),
            trip_id,
            party_id: party.id,
            role: party.role,
            location,
            timestamp: Utc::now(),
        };
        self.inner.storage.record_sos(&event).await?;
        warn!(trip_id = %trip_id, party_id = %party.id, role = %party.role, "SOS raised");

        let payload = json!({
            "sos_id": event.id,
            "trip_id": trip_id,
            "rider_id": rider_id,
            "raised_by": party.id,
            "role": party.role,
            "location": location,
            "timestamp": event.timestamp,
        });
        self.inner
            .notifier
            .notify(NotificationTarget::Operations, NotificationKind::SosRaised, payload.clone())
            .await;
        self.inner
            .notifier
            .notify(
                NotificationTarget::EmergencyContactsOf(rider_id),
                NotificationKind::SosRaised,
                payload,
            )
            .await;

        let _ = tx.send(SessionFrame::Event(CoordinationEvent::SosAcknowledged {
            trip_id,
            sos_id: event.id,
        }));
        Ok(event)
    }

    pub async fn publish(&self, trip_id: Uuid, event: CoordinationEvent) {
        {
            let shard = self.shard(trip_id).lock().await;
            if let Some(channel) = shard.get(&trip_id) {
                channel.broadcast(&event);
            }
        }
        let _ = self.inner.tap.send(event);
    }

    /// Delivers an event to one side of the trip only.
    pub async fn send_to(&self, trip_id: Uuid, role: PartyRole, event: CoordinationEvent) {
        {
            let mut shard = self.shard(trip_id).lock().await;
            if let Some(Some(slot)) = shard.get_mut(&trip_id).and_then(|c| c.slot_mut(role)) {
                slot.deliver(event.clone());
            }
        }
        let _ = self.inner.tap.send(event);
    }

    /// Marks a terminal trip's relay state for removal. It is dropped at once if
    /// nobody is subscribed, otherwise when the last session leaves. Chat stays
    /// recoverable from storage.
    pub async fn retire_trip(&self, trip_id: Uuid) {
        let mut shard = self.shard(trip_id).lock().await;
        let drop_now = match shard.get_mut(&trip_id) {
            Some(channel) => {
                channel.retired = true;
                channel.is_idle()
            }
            None => false,
        };
        if drop_now {
            shard.remove(&trip_id);
            debug!(trip_id = %trip_id, "trip channel closed");
        }
    }

    pub async fn has_channel(&self, trip_id: Uuid) -> bool {
        self.shard(trip_id).lock().await.contains_key(&trip_id)
    }
}
