mod estimate;
mod id;
mod msg;
mod new;
mod registry;
mod room;
mod tally;
mod ws;

use std::sync::Arc;

use axum::{extract::State, routing::{get, post}, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub use estimate::{Estimate, VoteValue, CARDS};
pub use id::RoomId;
pub use msg::{ClientEvent, ParticipantInfo, ServerEvent};
pub use registry::RoomRegistry;
pub use room::{Joined, ParticipantView, RoomOptions, RoomSession, RoomSnapshot};
pub use tally::{tally, Tally, VoteResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms", post(new::new_room))
        .route("/api/rooms/{id}", get(new::room_state))
        .route("/api/health", get(health))
        .route("/ws", get(ws::room_ws))
}

async fn health(State(registry): State<Arc<RoomRegistry>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "activeRooms": registry.len(),
        "pendingRooms": registry.pending_len(),
    }))
}
