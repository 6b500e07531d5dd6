//! Directory of live rooms (C3).
//!
//! Mirrors the primary-map-plus-secondary-index shape used elsewhere in
//! this codebase for O(1) reverse lookups: a primary `DashMap<code, Room>`
//! plus a secondary `DashMap<owner, Vec<code>>` so per-user room caps and
//! `close_rooms_owned_by` don't need a full scan.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng as _;

use crate::channel::OutboundChannel;
use crate::error::{CapacityKind, PlaysyncError};
use crate::protocol_constants::{ROOM_CODE_GENERATION_RETRIES, ROOM_CODE_LEN};
use crate::room::Room;

/// A room behind its own reader/writer lock.
pub type SharedRoom = Arc<RwLock<Room>>;

/// Per-user connection-count guard. Decrements on drop so a connection that
/// closes (cleanly or not) always releases its slot.
pub struct ConnectionSlot {
    user_id: i64,
    counts: Arc<DashMap<i64, AtomicU32>>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        if let Some(count) = self.counts.get(&self.user_id) {
            count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Directory of all live rooms, plus the per-user connection-count map used
/// to enforce `MAX_CONNECTIONS_PER_USER` (§3, §4.7).
pub struct Manager {
    rooms: DashMap<String, SharedRoom>,
    rooms_by_owner: DashMap<i64, Vec<String>>,
    connections_by_user: Arc<DashMap<i64, AtomicU32>>,
    max_rooms: usize,
    max_rooms_per_user: usize,
    max_connections_per_user: usize,
}

impl Manager {
    #[must_use]
    pub fn new(max_rooms: usize, max_rooms_per_user: usize, max_connections_per_user: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            rooms_by_owner: DashMap::new(),
            connections_by_user: Arc::new(DashMap::new()),
            max_rooms,
            max_rooms_per_user,
            max_connections_per_user,
        }
    }

    /// Acquires one of `owner_user_id`'s connection slots, or
    /// `UserMaxConnections` if already at cap.
    pub fn acquire_connection_slot(&self, user_id: i64) -> Result<ConnectionSlot, PlaysyncError> {
        let entry = self
            .connections_by_user
            .entry(user_id)
            .or_insert_with(|| AtomicU32::new(0));
        loop {
            let current = entry.load(Ordering::SeqCst);
            if current as usize >= self.max_connections_per_user {
                return Err(PlaysyncError::Capacity(CapacityKind::UserMaxConnections));
            }
            if entry
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(ConnectionSlot {
                    user_id,
                    counts: Arc::clone(&self.connections_by_user),
                });
            }
        }
    }

    fn generate_code(&self) -> Option<String> {
        let mut rng = rand::rng();
        for _ in 0..ROOM_CODE_GENERATION_RETRIES {
            let bytes: [u8; ROOM_CODE_LEN / 2] = rng.random();
            let code = bytes
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<String>();
            if !self.rooms.contains_key(&code) {
                return Some(code);
            }
        }
        None
    }

    /// Creates a room owned by `owner_user_id`, enforcing the global and
    /// per-user room caps (§4.3).
    pub fn create_room(
        &self,
        owner_user_id: i64,
        owner_username: String,
    ) -> Result<(SharedRoom, String), PlaysyncError> {
        if self.rooms.len() >= self.max_rooms {
            return Err(PlaysyncError::Capacity(CapacityKind::GlobalMaxRooms));
        }
        let owned = self
            .rooms_by_owner
            .get(&owner_user_id)
            .map_or(0, |v| v.len());
        if owned >= self.max_rooms_per_user {
            return Err(PlaysyncError::Capacity(CapacityKind::UserMaxRooms));
        }

        let code = self
            .generate_code()
            .ok_or_else(|| PlaysyncError::Internal("could not allocate a unique room code".into()))?;

        let room = Arc::new(RwLock::new(Room::new(
            code.clone(),
            owner_user_id,
            owner_username,
            self.max_rooms_per_room_default(),
        )));
        self.rooms.insert(code.clone(), Arc::clone(&room));
        self.rooms_by_owner
            .entry(owner_user_id)
            .or_default()
            .push(code.clone());

        Ok((room, code))
    }

    // `Room` owns its own per-room client cap so callers never need to pass
    // it on every mutator; the manager applies the configured default at
    // creation time.
    fn max_rooms_per_room_default(&self) -> usize {
        crate::protocol_constants::MAX_CLIENTS_PER_ROOM
    }

    #[must_use]
    pub fn get_room(&self, code: &str) -> Option<SharedRoom> {
        self.rooms.get(code).map(|r| Arc::clone(r.value()))
    }

    /// Removes a room from the directory unconditionally (used once the
    /// caller has confirmed the room is empty or is being force-closed).
    pub fn delete_room(&self, code: &str) -> Option<SharedRoom> {
        let (_, room) = self.rooms.remove(code)?;
        let owner = room.read().owner_user_id;
        if let Some(mut codes) = self.rooms_by_owner.get_mut(&owner) {
            codes.retain(|c| c != code);
        }
        Some(room)
    }

    /// Removes every room owned by `user_id` from the directory and returns
    /// them so the caller can notify participants *outside* the directory
    /// lock (§4.3, §5).
    pub fn close_rooms_owned_by(&self, user_id: i64) -> Vec<SharedRoom> {
        let Some((_, codes)) = self.rooms_by_owner.remove(&user_id) else {
            return Vec::new();
        };
        codes
            .into_iter()
            .filter_map(|code| self.rooms.remove(&code))
            .map(|(_, room)| room)
            .collect()
    }

    /// Channels for every participant across all rooms whose username
    /// matches, used by `send_to_user_by_username` (C8).
    #[must_use]
    pub fn channels_for_username(&self, username: &str) -> Vec<Arc<dyn OutboundChannel>> {
        self.rooms
            .iter()
            .flat_map(|entry| {
                let room = entry.value().read();
                room.participant_views()
                    .into_iter()
                    .filter(|v| v.username == username)
                    .filter_map(|v| room.find_by_session(&v.session_id).map(|p| Arc::clone(&p.channel)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// True iff some room has `audio_id` as its current track and contains
    /// `user_id` as a participant. Used by the external segment-serving
    /// layer for access control.
    #[must_use]
    pub fn is_user_in_room_playing(&self, user_id: i64, audio_id: i64) -> bool {
        self.rooms.iter().any(|entry| {
            let room = entry.value().read();
            room.track().is_some_and(|t| t.audio_id == audio_id)
                && room.find_by_user_id(user_id).is_some()
        })
    }

    /// True iff `user_id` is in a room and `audio_id` equals that room's
    /// current track. Prevents non-owners from prefetching segments of a
    /// track the room has moved on from.
    #[must_use]
    pub fn is_current_track(&self, user_id: i64, audio_id: i64) -> bool {
        self.rooms.iter().any(|entry| {
            let room = entry.value().read();
            room.find_by_user_id(user_id).is_some()
                && room.track().is_some_and(|t| t.audio_id == audio_id)
        })
    }

    /// Snapshots rooms inactive for longer than `idle_timeout_secs` and
    /// removes them from the directory, returning them so the caller can
    /// notify participants outside the directory lock (§4.3, §8 scenario
    /// S9).
    pub fn sweep_idle(&self, now_ms: u64, idle_timeout_secs: u64) -> Vec<SharedRoom> {
        let idle_timeout_ms = idle_timeout_secs * 1000;
        let stale: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| {
                now_ms.saturating_sub(entry.value().read().last_activity_ms()) > idle_timeout_ms
            })
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|code| self.delete_room(&code))
            .collect()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Snapshots every room currently in the directory, for the sync
    /// controller's tick loop (C6) to iterate without holding the
    /// directory lock across the iteration.
    #[must_use]
    pub fn all_rooms(&self) -> Vec<SharedRoom> {
        self.rooms.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
