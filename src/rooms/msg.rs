use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::RoomError;

use super::{estimate::VoteValue, room::{ParticipantView, RoomSnapshot}, tally::VoteResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantInfo {
    pub id: String,
    pub name: String,
}

/// Participant → server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom { room_id: String, participant: ParticipantInfo },
    LeaveRoom { room_id: String },
    Vote { room_id: String, participant_id: String, vote: VoteValue },
    RevealVotes { room_id: String },
    ResetVotes { room_id: String },
}

impl ClientEvent {
    pub fn room_id(&self) -> &str {
        use ClientEvent::*;
        match self {
            JoinRoom { room_id, .. }
            | LeaveRoom { room_id }
            | Vote { room_id, .. }
            | RevealVotes { room_id }
            | ResetVotes { room_id } => room_id,
        }
    }
}

/// Server → participant(s). Everything but `Error` is broadcast to the room.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    RoomStateUpdated { room: RoomSnapshot },
    ParticipantJoined { participant: ParticipantView, room_id: String },
    ParticipantLeft { participant_id: String, room_id: String },
    VoteCast { participant_id: String, room_id: String },
    VotesRevealed { room_id: String, results: Vec<VoteResult>, average: f64, total_votes: usize },
    Error { message: String, code: &'static str },
}

pub type SharedEvent = Arc<ServerEvent>;

impl From<&RoomError> for ServerEvent {
    fn from(err: &RoomError) -> Self {
        ServerEvent::Error { message: err.to_string(), code: err.code() }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_join() {
        let ev: ClientEvent = serde_json::from_value(json!({
            "event": "join-room",
            "data": { "roomId": "abc123", "participant": { "id": "u1", "name": "Ann" } }
        }))
        .unwrap();
        let ClientEvent::JoinRoom { room_id, participant } = ev else { panic!("expected join-room") };
        assert_eq!(room_id, "abc123");
        assert_eq!(participant.name, "Ann");
    }

    #[test]
    fn decodes_vote_values() {
        let ev: ClientEvent = serde_json::from_value(json!({
            "event": "vote",
            "data": { "roomId": "ABC123", "participantId": "u1", "vote": "unknown" }
        }))
        .unwrap();
        assert!(matches!(ev, ClientEvent::Vote { vote: VoteValue::Symbol(ref s), .. } if s == "unknown"));
        assert_eq!(ev.room_id(), "ABC123");
    }

    #[test]
    fn encodes_error() {
        let ev = ServerEvent::from(&RoomError::NoVotes);
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({ "event": "error", "data": { "message": "no votes have been cast yet", "code": "NO_VOTES" } })
        );
    }

    #[test]
    fn vote_cast_hides_the_value() {
        let ev = ServerEvent::VoteCast { participant_id: "u1".into(), room_id: "ABC123".into() };
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({ "event": "vote-cast", "data": { "participantId": "u1", "roomId": "ABC123" } })
        );
    }
}
