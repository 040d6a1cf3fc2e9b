use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    debug_handler,
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{broadcast::{self, error::RecvError}, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{config::Config, error::{RoomError, RoomResult}};

use super::{
    id::RoomId,
    msg::{ClientEvent, ServerEvent, SharedEvent},
    registry::RoomRegistry,
    room::RoomSession,
};

const OUTBOUND_BUFFER: usize = 256;
// how long a closing socket gets to flush its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    State(registry): State<Arc<RoomRegistry>>,
    State(config): State<Arc<Config>>,
    State(shutdown): State<Arc<watch::Sender<bool>>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let shutdown = shutdown.subscribe();
    ws.on_upgrade(move |socket| {
        let conn_id = Uuid::now_v7();
        let conn = Connection {
            conn_id,
            idle_timeout: config.idle_timeout,
            ping_interval: config.ping_interval,
            shutdown,
        };
        serve(registry, conn, socket).instrument(info_span!("conn", %conn_id))
    })
}

/// What the writer task puts on the wire.
#[derive(Debug)]
enum Outbound {
    Event(SharedEvent),
    Ping,
    Close(&'static str),
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hangup {
    Client,
    Writer,
    Idle,
    Shutdown,
}

struct Connection {
    conn_id: Uuid,
    idle_timeout: Duration,
    ping_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

/// The room this connection is currently in.
struct Membership {
    room: Arc<RoomSession>,
    participant_id: String,
    forward: JoinHandle<()>,
}

struct Gateway {
    registry: Arc<RoomRegistry>,
    conn_id: Uuid,
    outbound: mpsc::Sender<Outbound>,
    joined: Option<Membership>,
}

async fn serve(registry: Arc<RoomRegistry>, mut conn: Connection, stream: WebSocket) {
    info!("connection opened");
    let (mut sender, mut receiver) = stream.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let mut write_task = tokio::spawn(
        async move {
            while let Some(item) = outbound_rx.recv().await {
                let msg = match item {
                    Outbound::Event(event) => match serde_json::to_string(&*event) {
                        Ok(json) => Message::Text(json.into()),
                        Err(err) => {
                            warn!(error = %err, "failed to encode event");
                            continue;
                        }
                    },
                    Outbound::Ping => Message::Ping(Bytes::new()),
                    Outbound::Close(reason) => {
                        let frame = CloseFrame { code: close_code::AWAY, reason: reason.into() };
                        let _ = sender.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        }
        .in_current_span(),
    );

    let mut gateway = Gateway { registry, conn_id: conn.conn_id, outbound, joined: None };

    let mut ping = tokio::time::interval_at(Instant::now() + conn.ping_interval, conn.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = tokio::time::sleep(conn.idle_timeout);
    tokio::pin!(idle);

    let hangup = loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = ping.tick() => {
                // a full queue means the client is already behind; skip this one
                let _ = gateway.outbound.try_send(Outbound::Ping);
                continue;
            }
            _ = &mut idle => {
                info!(timeout_ms = conn.idle_timeout.as_millis() as u64, "connection idle, dropping");
                break Hangup::Idle;
            }
            Ok(()) = conn.shutdown.changed() => break Hangup::Shutdown,
            _ = &mut write_task => break Hangup::Writer,
        };
        // any frame, pongs included, proves the peer is alive
        idle.as_mut().reset(Instant::now() + conn.idle_timeout);

        let msg = match frame {
            None => break Hangup::Client,
            Some(Err(err)) => {
                debug!(error = %err, "socket error");
                break Hangup::Client;
            }
            Some(Ok(msg)) => msg,
        };

        let event = match msg {
            Message::Text(text) => serde_json::from_str::<ClientEvent>(text.as_str()),
            Message::Binary(bytes) => serde_json::from_slice::<ClientEvent>(&bytes),
            Message::Close(_) => break Hangup::Client,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        match event {
            Ok(event) => gateway.handle(event).await,
            Err(err) => {
                debug!(error = %err, "undecodable frame");
                gateway.reply_error(&RoomError::validation(format!("malformed event: {err}"))).await;
            }
        }
    };

    gateway.depart();
    let reason = match hangup {
        Hangup::Idle => Some("idle timeout"),
        Hangup::Shutdown => Some("server shutting down"),
        Hangup::Client | Hangup::Writer => None,
    };
    if let Some(reason) = reason {
        let flushed = tokio::time::timeout(CLOSE_GRACE, async {
            if gateway.outbound.send(Outbound::Close(reason)).await.is_ok() {
                let _ = (&mut write_task).await;
            }
        })
        .await;
        if flushed.is_err() {
            debug!("close frame not flushed in time");
        }
    }
    write_task.abort();
    info!(?hangup, "connection closed");
}

impl Gateway {
    async fn handle(&mut self, event: ClientEvent) {
        if let Err(err) = self.dispatch(event) {
            debug!(code = err.code(), error = %err, "request refused");
            self.reply_error(&err).await;
        }
    }

    fn dispatch(&mut self, event: ClientEvent) -> RoomResult<()> {
        let room_id: RoomId = event.room_id().parse()?;
        match event {
            ClientEvent::JoinRoom { participant, .. } => {
                let (room, joined) =
                    self.registry.join(&room_id, &participant.id, &participant.name, self.conn_id)?;
                let same_seat = self
                    .joined
                    .as_ref()
                    .is_some_and(|m| Arc::ptr_eq(&m.room, &room) && m.participant_id == participant.id);
                if same_seat {
                    // the existing feed already carries this rejoin
                    return Ok(());
                }
                self.depart();
                let forward = tokio::spawn(
                    forward(room.clone(), joined.events, self.outbound.clone()).in_current_span(),
                );
                self.joined = Some(Membership { room, participant_id: participant.id, forward });
            }
            ClientEvent::LeaveRoom { .. } => {
                if self.joined.as_ref().is_some_and(|m| *m.room.id() == room_id) {
                    self.depart();
                }
            }
            ClientEvent::Vote { participant_id, vote, .. } => {
                self.registry.get(&room_id)?.cast_vote(&participant_id, vote)?;
            }
            ClientEvent::RevealVotes { .. } => {
                self.registry.get(&room_id)?.reveal()?;
            }
            ClientEvent::ResetVotes { .. } => {
                self.registry.get(&room_id)?.reset();
            }
        }
        Ok(())
    }

    async fn reply_error(&self, err: &RoomError) {
        let _ = self.outbound.send(Outbound::Event(Arc::new(ServerEvent::from(err)))).await;
    }

    /// Gives up this connection's seat, if it still holds one, and retires
    /// the room when it empties. A seat another connection has since rejoined
    /// under the same id is left alone.
    fn depart(&mut self) {
        if let Some(m) = self.joined.take() {
            m.forward.abort();
            m.room.leave(&m.participant_id, self.conn_id);
            self.registry.retire_if_empty(m.room.id());
        }
    }
}

/// Relays one room's broadcast feed into this connection's outbound queue.
///
/// A relay that falls behind drops its backlog and starts over from a fresh
/// snapshot, so the client never sees state older than what it was last sent.
async fn forward(
    room: Arc<RoomSession>,
    mut events: broadcast::Receiver<SharedEvent>,
    outbound: mpsc::Sender<Outbound>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(room_id = %room.id(), skipped, "fell behind room feed, resending state");
                // subscribe before snapshotting so nothing falls in between
                events = events.resubscribe();
                Arc::new(ServerEvent::RoomStateUpdated { room: room.snapshot() })
            }
            Err(RecvError::Closed) => break,
        };
        if outbound.send(Outbound::Event(event)).await.is_err() {
            break;
        }
    }
}
