use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RoomError, RoomResult};

use super::{
    estimate::{Estimate, VoteValue},
    id::RoomId,
    msg::{ServerEvent, SharedEvent},
    tally::tally,
};

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_TITLE_LEN: usize = 100;

#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub title: Option<String>,
    pub max_participants: usize,
}

#[derive(Debug, Clone)]
struct Participant {
    id: String,
    name: String,
    // the connection that last joined under this id
    owner: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: String,
    pub name: String,
    pub has_voted: bool,
    /// Only filled in once the round is revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote: Option<Estimate>,
}

/// Everything a participant may see about a room at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub max_participants: usize,
    pub participants: Vec<ParticipantView>,
    pub vote_count: usize,
    pub is_revealed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

struct RoomState {
    title: Option<String>,
    max_participants: usize,
    // join order, kept for display
    participants: Vec<Participant>,
    votes: HashMap<String, Estimate>,
    is_revealed: bool,
    created_at: OffsetDateTime,
    retired: bool,
}

impl RoomState {
    fn position(&self, participant_id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id == participant_id)
    }

    fn view(&self, p: &Participant) -> ParticipantView {
        let vote = self.votes.get(&p.id).copied();
        ParticipantView {
            id: p.id.clone(),
            name: p.name.clone(),
            has_voted: vote.is_some(),
            vote: vote.filter(|_| self.is_revealed),
        }
    }

    fn snapshot(&self, id: &RoomId) -> RoomSnapshot {
        RoomSnapshot {
            id: id.clone(),
            title: self.title.clone(),
            max_participants: self.max_participants,
            participants: self.participants.iter().map(|p| self.view(p)).collect(),
            vote_count: self.votes.len(),
            is_revealed: self.is_revealed,
            created_at: self.created_at,
        }
    }
}

/// A successful join: the room as the joiner first sees it, and the feed of
/// every room event from that join onward.
pub struct Joined {
    pub snapshot: RoomSnapshot,
    pub events: broadcast::Receiver<SharedEvent>,
}

/// Sole owner of one room's state.
///
/// Every operation takes the room lock for the in-memory transition only and
/// queues the resulting events on the room's broadcast channel before
/// releasing it, so subscribers see events in exactly the order operations
/// were applied. Socket writes happen elsewhere, outside the lock.
pub struct RoomSession {
    id: RoomId,
    state: Mutex<RoomState>,
    events: broadcast::Sender<SharedEvent>,
}

impl RoomSession {
    pub fn new(id: RoomId, options: RoomOptions, broadcast_capacity: usize) -> Arc<RoomSession> {
        Arc::new(RoomSession {
            id,
            state: Mutex::new(RoomState {
                title: options.title,
                max_participants: options.max_participants,
                participants: Vec::new(),
                votes: HashMap::new(),
                is_revealed: false,
                created_at: OffsetDateTime::now_utc(),
                retired: false,
            }),
            events: broadcast::channel(broadcast_capacity).0,
        })
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.state.lock().snapshot(&self.id)
    }

    fn publish(&self, event: ServerEvent) {
        // Err only means nobody is listening right now.
        let _ = self.events.send(Arc::new(event));
    }

    fn publish_state(&self, state: &RoomState) -> RoomSnapshot {
        let snapshot = state.snapshot(&self.id);
        self.publish(ServerEvent::RoomStateUpdated { room: snapshot.clone() });
        snapshot
    }

    /// Adds the participant, or renames them if the id is already a member.
    /// Either way `owner` becomes the connection holding the seat.
    ///
    /// Returns `Ok(None)` if the room was retired before this call got the
    /// lock; the caller should fetch a fresh room from the registry.
    pub(crate) fn join(&self, participant_id: &str, display_name: &str, owner: Uuid) -> RoomResult<Option<Joined>> {
        let name = display_name.trim();
        if participant_id.trim().is_empty() {
            return Err(RoomError::validation("participant id must not be empty"));
        }
        if name.is_empty() {
            return Err(RoomError::validation("display name must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(RoomError::validation(format!(
                "display name must be at most {MAX_NAME_LEN} characters"
            )));
        }

        let mut state = self.state.lock();
        if state.retired {
            return Ok(None);
        }

        match state.position(participant_id) {
            Some(i) => {
                let seat = &mut state.participants[i];
                seat.name = name.to_owned();
                seat.owner = owner;
            }
            None => {
                if state.participants.len() >= state.max_participants {
                    return Err(RoomError::Capacity(state.max_participants));
                }
                state.participants.push(Participant {
                    id: participant_id.to_owned(),
                    name: name.to_owned(),
                    owner,
                });
            }
        }
        info!(room_id = %self.id, participant_id, members = state.participants.len(), "participant joined");

        let events = self.events.subscribe();
        let participant = state
            .position(participant_id)
            .map(|i| state.view(&state.participants[i]))
            .ok_or_else(|| RoomError::NotAMember(participant_id.to_owned()))?;
        self.publish(ServerEvent::ParticipantJoined { participant, room_id: self.id.to_string() });
        let snapshot = self.publish_state(&state);

        Ok(Some(Joined { snapshot, events }))
    }

    /// Removes the participant and their vote, if `owner` still holds the
    /// seat. Returns whether anyone left; leaving twice is fine. A connection
    /// superseded by a rejoin under the same id leaves the seat to its
    /// successor.
    pub fn leave(&self, participant_id: &str, owner: Uuid) -> bool {
        let mut state = self.state.lock();
        let Some(i) = state.position(participant_id) else {
            return false;
        };
        if state.participants[i].owner != owner {
            debug!(room_id = %self.id, participant_id, "seat taken over by a newer connection, keeping it");
            return false;
        }
        state.participants.remove(i);
        state.votes.remove(participant_id);
        if state.votes.is_empty() {
            state.is_revealed = false;
        }
        info!(room_id = %self.id, participant_id, members = state.participants.len(), "participant left");

        self.publish(ServerEvent::ParticipantLeft {
            participant_id: participant_id.to_owned(),
            room_id: self.id.to_string(),
        });
        self.publish_state(&state);
        true
    }

    pub fn cast_vote(&self, participant_id: &str, vote: VoteValue) -> RoomResult<RoomSnapshot> {
        let mut state = self.state.lock();
        if state.position(participant_id).is_none() {
            return Err(RoomError::NotAMember(participant_id.to_owned()));
        }
        let estimate = Estimate::try_from(vote)?;
        if state.is_revealed {
            return Err(RoomError::RoundClosed);
        }

        state.votes.insert(participant_id.to_owned(), estimate);
        debug!(room_id = %self.id, participant_id, votes = state.votes.len(), "vote cast");

        self.publish(ServerEvent::VoteCast {
            participant_id: participant_id.to_owned(),
            room_id: self.id.to_string(),
        });
        Ok(self.publish_state(&state))
    }

    pub fn reveal(&self) -> RoomResult<RoomSnapshot> {
        let mut state = self.state.lock();
        if state.votes.is_empty() {
            return Err(RoomError::NoVotes);
        }
        if state.is_revealed {
            return Ok(state.snapshot(&self.id));
        }

        state.is_revealed = true;
        let result = tally(state.participants.iter().filter_map(|p| {
            state.votes.get(&p.id).map(|&v| (p.id.as_str(), p.name.as_str(), v))
        }));
        info!(room_id = %self.id, total_votes = result.total_votes, average = result.average, "votes revealed");

        self.publish(ServerEvent::VotesRevealed {
            room_id: self.id.to_string(),
            results: result.results,
            average: result.average,
            total_votes: result.total_votes,
        });
        Ok(self.publish_state(&state))
    }

    /// Starts a new round. Always succeeds, even on an empty round.
    pub fn reset(&self) -> RoomSnapshot {
        let mut state = self.state.lock();
        state.votes.clear();
        state.is_revealed = false;
        info!(room_id = %self.id, "votes reset");
        self.publish_state(&state)
    }

    /// Marks the room retired if nobody is in it. A retired room refuses
    /// joins, which sends late joiners back to the registry.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut state = self.state.lock();
        if state.participants.is_empty() {
            state.retired = true;
        }
        state.retired
    }
}
