use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::CurrentParty,
    error::AppError,
    models::{
        event::{ClientMessage, CoordinationEvent},
        party::{Party, PartyRole},
    },
    services::coordination::{SessionFrame, SessionLink},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(
    State(state): State<AppState>,
    current: CurrentParty,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let party = current.require_party()?;
    if party.role == PartyRole::System {
        return Err(AppError::Forbidden);
    }
    Ok(ws.on_upgrade(move |socket| async move {
        let connected = state.hub.connect(party).await;
        match connected {
            Ok(link) => run_session(socket, state, link).await,
            Err(err) => warn!(party_id = %party.id, error = %err, "session rejected"),
        }
    }))
}

async fn run_session(socket: WebSocket, state: AppState, link: SessionLink) {
    let SessionLink {
        session_id,
        party,
        mut frames,
    } = link;
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<CoordinationEvent>();

    let mut send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                frame = frames.recv() => match frame {
                    Some(SessionFrame::Event(event)) => event,
                    Some(SessionFrame::Close) | None => break,
                },
                Some(reply) = replies.recv() => reply,
            };
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %err, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let result = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => dispatch(&recv_state, session_id, party, message).await,
                Err(err) => Err(AppError::BadRequest(format!("unreadable frame: {err}"))),
            };
            match result {
                Ok(()) => {}
                Err(AppError::SessionSuperseded) => break,
                Err(err) => {
                    debug!(session_id = %session_id, error = %err, "client message rejected");
                    let _ = reply_tx.send(CoordinationEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    if let Err(err) = state.hub.disconnect(session_id).await {
        warn!(session_id = %session_id, error = %err, "disconnect cleanup failed");
    }
}

/// Handles one client frame for a connected session.
pub async fn dispatch(
    state: &AppState,
    session_id: Uuid,
    party: Party,
    message: ClientMessage,
) -> Result<(), AppError> {
    match message {
        ClientMessage::Subscribe {
            trip_id,
            last_seen_seq,
        } => {
            let trip = state.trips.find(trip_id).await?;
            let member = match party.role {
                PartyRole::Rider => trip.rider_id == party.id,
                PartyRole::Driver => trip.driver_id == Some(party.id),
                PartyRole::System => false,
            };
            if !member {
                return Err(AppError::Forbidden);
            }
            state.hub.subscribe(session_id, trip_id, last_seen_seq).await?;
            if trip.status.is_terminal() {
                state.hub.retire_trip(trip_id).await;
            } else if party.role == PartyRole::Rider {
                state.safety.resend_challenge(trip_id).await;
            }
        }
        ClientMessage::Unsubscribe { trip_id } => {
            state.hub.unsubscribe(session_id, trip_id).await?;
        }
        ClientMessage::Location { trip_id, sample } => {
            state.hub.relay_location(session_id, trip_id, sample).await?;
        }
        ClientMessage::Chat { trip_id, body } => {
            state.hub.send_chat(session_id, trip_id, body).await?;
        }
        ClientMessage::Sos { trip_id, location } => {
            let trip = state.trips.find(trip_id).await?;
            state
                .hub
                .raise_sos(session_id, trip_id, trip.rider_id, location)
                .await?;
        }
        ClientMessage::ConfirmSafe { trip_id } => {
            state.safety.confirm_safe(trip_id, party).await?;
        }
    }
    Ok(())
}
