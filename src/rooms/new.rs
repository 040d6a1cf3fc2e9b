use std::sync::Arc;

use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{config::ROOM_CAPACITY_LIMIT, error::RoomError, AppResult};

use super::{
    id::RoomId,
    registry::RoomRegistry,
    room::{RoomOptions, MAX_TITLE_LEN},
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomQuery {
    title: Option<String>,
    #[serde(alias = "maxUsers")]
    max_participants: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoom {
    id: RoomId,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    max_participants: usize,
}

impl NewRoomQuery {
    fn into_options(self, default_max_participants: usize) -> Result<RoomOptions, RoomError> {
        let title = self
            .title
            .map(|t| t.trim().to_owned())
            .filter(|t| !t.is_empty());
        if title.as_ref().is_some_and(|t| t.chars().count() > MAX_TITLE_LEN) {
            return Err(RoomError::validation(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }

        let max_participants = self.max_participants.unwrap_or(default_max_participants);
        if !(1..=ROOM_CAPACITY_LIMIT).contains(&max_participants) {
            return Err(RoomError::validation(format!(
                "maxParticipants must be between 1 and {ROOM_CAPACITY_LIMIT}"
            )));
        }

        Ok(RoomOptions { title, max_participants })
    }
}

/// Mints a room id for the lobby. The room only goes live on its first join
/// over the socket; until then its options wait in the registry.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(registry): State<Arc<RoomRegistry>>,
    Json(query): Json<NewRoomQuery>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let options = query.into_options(registry.default_max_participants())?;
    let data = NewRoom {
        title: options.title.clone(),
        max_participants: options.max_participants,
        id: registry.create(options)?,
    };
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": data }))))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_state(
    State(registry): State<Arc<RoomRegistry>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let room_id: RoomId = room_id.parse()?;
    let snapshot = registry.get(&room_id)?.snapshot();
    Ok(Json(json!({ "success": true, "data": snapshot })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(title: Option<&str>, max: Option<usize>) -> NewRoomQuery {
        NewRoomQuery { title: title.map(str::to_owned), max_participants: max }
    }

    #[test]
    fn defaults_apply() {
        let opts = NewRoomQuery::default().into_options(10).unwrap();
        assert_eq!(opts.title, None);
        assert_eq!(opts.max_participants, 10);
    }

    #[test]
    fn blank_title_is_absent() {
        let opts = query(Some("   "), Some(4)).into_options(10).unwrap();
        assert_eq!(opts.title, None);
        assert_eq!(opts.max_participants, 4);
    }

    #[test]
    fn limits_are_enforced() {
        let long = "t".repeat(MAX_TITLE_LEN + 1);
        assert!(query(Some(&long), None).into_options(10).is_err());
        assert!(query(None, Some(0)).into_options(10).is_err());
        assert!(query(None, Some(ROOM_CAPACITY_LIMIT + 1)).into_options(10).is_err());
    }

    #[test]
    fn accepts_legacy_field_name() {
        let q: NewRoomQuery = serde_json::from_str(r#"{"title":"Sprint","maxUsers":6}"#).unwrap();
        assert_eq!(q.max_participants, Some(6));
    }
}
