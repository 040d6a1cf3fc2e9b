use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::Config, error::{RoomError, RoomResult}};

use super::{
    id::RoomId,
    room::{Joined, RoomOptions, RoomSession},
};

/// Options for a room minted over HTTP that nobody has joined yet.
struct Pending {
    options: RoomOptions,
    expires_at: Instant,
}

#[derive(Default)]
struct Rooms {
    active: HashMap<RoomId, Arc<RoomSession>>,
    pending: HashMap<RoomId, Pending>,
}

impl Rooms {
    fn prune_pending(&mut self, now: Instant) {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.expires_at > now);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, "forgot unclaimed rooms");
        }
    }
}

/// Maps active room ids to their sessions.
///
/// Only rooms someone is in hold a session. A room minted over HTTP sits in a
/// pending table until its first join, and is forgotten if that never
/// happens within the TTL.
///
/// The map lock is held for lookups and inserts only. When both locks are
/// needed (retirement) the map lock is always taken first.
pub struct RoomRegistry {
    rooms: Mutex<Rooms>,
    default_max_participants: usize,
    broadcast_capacity: usize,
    pending_room_ttl: Duration,
    max_pending_rooms: usize,
}

impl RoomRegistry {
    pub fn new(config: &Config) -> RoomRegistry {
        RoomRegistry {
            rooms: Mutex::new(Rooms::default()),
            default_max_participants: config.default_max_participants,
            broadcast_capacity: config.broadcast_capacity,
            pending_room_ttl: config.pending_room_ttl,
            max_pending_rooms: config.max_pending_rooms,
        }
    }

    pub fn default_max_participants(&self) -> usize {
        self.default_max_participants
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().active.is_empty()
    }

    /// Minted rooms still waiting for their first participant.
    pub fn pending_len(&self) -> usize {
        let mut rooms = self.rooms.lock();
        rooms.prune_pending(Instant::now());
        rooms.pending.len()
    }

    pub fn get(&self, room_id: &RoomId) -> RoomResult<Arc<RoomSession>> {
        self.rooms
            .lock()
            .active
            .get(room_id)
            .cloned()
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))
    }

    /// Returns the room, creating an empty one if the id is not active. A
    /// pending (minted, unexpired) id is claimed with its minted options.
    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<RoomSession> {
        let mut guard = self.rooms.lock();
        let rooms = &mut *guard;
        if let Some(session) = rooms.active.get(room_id) {
            return session.clone();
        }

        let options = match rooms.pending.remove(room_id) {
            Some(p) if p.expires_at > Instant::now() => p.options,
            _ => RoomOptions { title: None, max_participants: self.default_max_participants },
        };
        debug!(room_id = %room_id, title = ?options.title, "room opened on first join");
        let session = RoomSession::new(room_id.clone(), options, self.broadcast_capacity);
        rooms.active.insert(room_id.clone(), session.clone());
        session
    }

    /// Mints a fresh id and parks its options until the first join.
    pub fn create(&self, options: RoomOptions) -> RoomResult<RoomId> {
        let mut rooms = self.rooms.lock();
        let now = Instant::now();
        rooms.prune_pending(now);
        if rooms.pending.len() >= self.max_pending_rooms {
            warn!(pending = rooms.pending.len(), "refusing to mint a room, too many unclaimed");
            return Err(RoomError::TooManyRooms);
        }

        let id = loop {
            let id = RoomId::random();
            if !rooms.active.contains_key(&id) && !rooms.pending.contains_key(&id) {
                break id;
            }
        };
        info!(room_id = %id, title = ?options.title, max_participants = options.max_participants, "room minted");
        rooms
            .pending
            .insert(id.clone(), Pending { options, expires_at: now + self.pending_room_ttl });
        Ok(id)
    }

    /// Joins the room, creating it if needed. A room retired between lookup
    /// and join is replaced by a fresh one.
    pub fn join(
        &self,
        room_id: &RoomId,
        participant_id: &str,
        display_name: &str,
        owner: Uuid,
    ) -> RoomResult<(Arc<RoomSession>, Joined)> {
        loop {
            let session = self.get_or_create(room_id);
            if let Some(joined) = session.join(participant_id, display_name, owner)? {
                return Ok((session, joined));
            }
            debug!(room_id = %room_id, "room retired during join, retrying");
        }
    }

    /// Drops the room if nobody is left in it. Safe to call at any time.
    pub fn retire_if_empty(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.lock();
        let Some(session) = rooms.active.get(room_id) else {
            return false;
        };
        if !session.retire_if_empty() {
            return false;
        }
        rooms.active.remove(room_id);
        info!(room_id = %room_id, active_rooms = rooms.active.len(), "room retired");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rooms::estimate::VoteValue;

    fn id(s: &str) -> RoomId {
        s.parse().unwrap()
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(&Config::default())
    }

    fn join(reg: &RoomRegistry, room: &RoomId, who: &str) -> RoomResult<(Arc<RoomSession>, Joined)> {
        reg.join(room, who, who, Uuid::nil())
    }

    #[test]
    fn lazily_creates_and_retires() {
        let reg = registry();
        assert_eq!(reg.get(&id("ABC123")).err().unwrap().code(), "NOT_FOUND");

        let (room, _) = join(&reg, &id("abc123"), "a").unwrap();
        assert_eq!(reg.len(), 1);
        assert!(Arc::ptr_eq(&room, &reg.get(&id("ABC123")).unwrap()));

        assert!(!reg.retire_if_empty(&id("ABC123")));
        room.leave("a", Uuid::nil());
        assert!(reg.retire_if_empty(&id("ABC123")));
        assert!(!reg.retire_if_empty(&id("ABC123")));
        assert!(reg.is_empty());
    }

    #[test]
    fn minted_rooms_wait_outside_the_active_map() {
        let reg = registry();
        let room_id = reg.create(RoomOptions { title: Some("Sprint 7".into()), max_participants: 2 }).unwrap();
        assert!(reg.is_empty());
        assert_eq!(reg.pending_len(), 1);
        assert_eq!(reg.get(&room_id).err().unwrap().code(), "NOT_FOUND");

        let (room, _) = join(&reg, &room_id, "a").unwrap();
        assert_eq!((reg.len(), reg.pending_len()), (1, 0));
        join(&reg, &room_id, "b").unwrap();
        let err = join(&reg, &room_id, "c").err().unwrap();
        assert_eq!(err, RoomError::Capacity(2));
        assert_eq!(room.snapshot().title.as_deref(), Some("Sprint 7"));
    }

    #[test]
    fn unclaimed_rooms_expire() {
        let config = Config { pending_room_ttl: Duration::ZERO, ..Config::default() };
        let reg = RoomRegistry::new(&config);
        let room_id = reg.create(RoomOptions { title: Some("Stale".into()), max_participants: 3 }).unwrap();
        assert_eq!(reg.pending_len(), 0);

        // the id still works, it just opens with defaults
        let (room, _) = join(&reg, &room_id, "a").unwrap();
        let snap = room.snapshot();
        assert_eq!(snap.title, None);
        assert_eq!(snap.max_participants, 10);
    }

    #[test]
    fn minting_is_capped() {
        let config = Config { max_pending_rooms: 2, ..Config::default() };
        let reg = RoomRegistry::new(&config);
        let opts = || RoomOptions { title: None, max_participants: 10 };
        let first = reg.create(opts()).unwrap();
        reg.create(opts()).unwrap();
        assert_eq!(reg.create(opts()).unwrap_err(), RoomError::TooManyRooms);

        join(&reg, &first, "a").unwrap();
        reg.create(opts()).unwrap();
    }

    #[test]
    fn join_after_retirement_gets_a_fresh_room() {
        let reg = registry();
        let (old, _) = join(&reg, &id("ROOM01"), "a").unwrap();
        old.cast_vote("a", VoteValue::Integer(3)).unwrap();
        old.leave("a", Uuid::nil());
        reg.retire_if_empty(&id("ROOM01"));

        let (fresh, joined) = join(&reg, &id("ROOM01"), "b").unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(joined.snapshot.participants.len(), 1);
        assert_eq!(joined.snapshot.vote_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_joins_share_one_room() {
        let reg = Arc::new(registry());
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let reg = reg.clone();
                tokio::spawn(async move {
                    let (room, _) = join(&reg, &id("RACE01"), &format!("p{i}")).unwrap();
                    room
                })
            })
            .collect();
        let mut rooms = Vec::new();
        for t in tasks {
            rooms.push(t.await.unwrap());
        }
        assert!(rooms.iter().all(|r| Arc::ptr_eq(r, &rooms[0])));
        assert_eq!(rooms[0].snapshot().participants.len(), 8);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_votes_from_many_tasks() {
        let reg = Arc::new(registry());
        let room_id = id("VOTE01");
        for i in 0..10 {
            join(&reg, &room_id, &format!("p{i}")).unwrap();
        }
        let cards = [0i64, 1, 2, 3, 5, 8, 13, 21, 34, 55];
        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let room = reg.get(&room_id).unwrap();
                tokio::spawn(async move { room.cast_vote(&format!("p{i}"), VoteValue::Integer(cards[i])) })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let snap = reg.get(&room_id).unwrap().reveal().unwrap();
        assert_eq!(snap.vote_count, 10);
        for (i, p) in snap.participants.iter().enumerate() {
            assert_eq!(p.id, format!("p{i}"));
            assert_eq!(p.vote.and_then(|v| v.points()), Some(cards[i] as u8));
        }
    }
}
