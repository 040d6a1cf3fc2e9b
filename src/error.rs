use axum::http::StatusCode;

/// Every way a room operation can be refused.
///
/// A refused operation never mutates the room, and its error is only ever
/// reported back to whoever asked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("{0}")]
    Validation(String),
    #[error("{0:?} is not an allowed estimate")]
    InvalidEstimate(String),
    #[error("participant {0} is not in this room")]
    NotAMember(String),
    #[error("room is full ({0} participants)")]
    Capacity(usize),
    #[error("no votes have been cast yet")]
    NoVotes,
    #[error("votes are revealed; reset the round before voting again")]
    RoundClosed,
    #[error("room {0} does not exist")]
    NotFound(String),
    #[error("too many rooms are waiting for their first participant; try again later")]
    TooManyRooms,
}

impl RoomError {
    pub fn validation(msg: impl Into<String>) -> Self {
        RoomError::Validation(msg.into())
    }

    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        use RoomError::*;
        match self {
            Validation(_) => "VALIDATION_ERROR",
            InvalidEstimate(_) => "INVALID_ESTIMATE",
            NotAMember(_) => "NOT_A_MEMBER",
            Capacity(_) => "ROOM_FULL",
            NoVotes => "NO_VOTES",
            RoundClosed => "ROUND_CLOSED",
            NotFound(_) => "NOT_FOUND",
            TooManyRooms => "TOO_MANY_ROOMS",
        }
    }

    pub fn status(&self) -> StatusCode {
        use RoomError::*;
        match self {
            Validation(_) | InvalidEstimate(_) => StatusCode::BAD_REQUEST,
            NotAMember(_) => StatusCode::FORBIDDEN,
            Capacity(_) | NoVotes | RoundClosed => StatusCode::CONFLICT,
            NotFound(_) => StatusCode::NOT_FOUND,
            TooManyRooms => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;
