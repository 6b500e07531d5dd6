//! Trait-at-the-seam contracts for the two external collaborators (§6.2).
//!
//! The auth and persistence layers are deliberately out of scope (§1); the
//! core only needs their shape. Each is a trait with one no-op/in-memory
//! test double, mirroring how the core's own platform-abstraction traits
//! (e.g. `SonosClient` in the teacher codebase) are structured: a trait at
//! the seam, one production implementation supplied by the binary crate or
//! the surrounding system, one test double here.

use async_trait::async_trait;

use crate::protocol::{Role, TrackMetadata};

/// Identity resolved from a bearer credential by the external auth layer
/// (§6.2). Supplied once per HTTP upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

/// Extracts `{userID, username, role}` from a bearer credential.
///
/// The core never inspects or validates the credential itself (§4.9) — it
/// only consumes the already-verified identity this trait returns.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolves the identity carried by `bearer_token`, or `None` if the
    /// token is missing/invalid.
    async fn extract_user(&self, bearer_token: Option<&str>) -> Option<AuthenticatedUser>;
}

/// One item of a room's external playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistItem {
    pub track_index: i64,
    pub audio_id: i64,
}

/// Read-only accessors onto the relational persistence layer (§6.2).
///
/// All reads are synchronous from the core's point of view (the trait is
/// `async` only because the production implementation talks to a
/// database); the core treats any error as "track unavailable" and drops
/// the operation rather than propagating a persistence failure to peers
/// (§7).
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    /// Returns the playlist bound to `room_code`, if any.
    async fn get_playlist_by_room(&self, room_code: &str) -> Option<i64>;

    /// Returns the ordered items of playlist `playlist_id`.
    async fn get_playlist_items(&self, playlist_id: i64) -> Vec<PlaylistItem>;

    /// Resolves full track metadata for `audio_id`.
    async fn get_audio_file(&self, audio_id: i64) -> Option<TrackMetadata>;
}

/// No-op auth provider: every credential resolves to nothing.
///
/// Useful for embedding the core in a test harness or a deployment that
/// fronts it with its own admission layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuthProvider;

#[async_trait]
impl AuthProvider for NoopAuthProvider {
    async fn extract_user(&self, _bearer_token: Option<&str>) -> Option<AuthenticatedUser> {
        None
    }
}

/// In-memory persistence double, keyed by room code then playlist index.
///
/// Tests populate it directly; nothing here touches a real database.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    playlists_by_room: dashmap::DashMap<String, i64>,
    items_by_playlist: dashmap::DashMap<i64, Vec<PlaylistItem>>,
    tracks_by_audio_id: dashmap::DashMap<i64, TrackMetadata>,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_playlist(&self, room_code: &str, playlist_id: i64, items: Vec<PlaylistItem>) {
        self.playlists_by_room.insert(room_code.to_string(), playlist_id);
        self.items_by_playlist.insert(playlist_id, items);
    }

    pub fn seed_track(&self, track: TrackMetadata) {
        self.tracks_by_audio_id.insert(track.audio_id, track);
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryPersistence {
    async fn get_playlist_by_room(&self, room_code: &str) -> Option<i64> {
        self.playlists_by_room.get(room_code).map(|v| *v)
    }

    async fn get_playlist_items(&self, playlist_id: i64) -> Vec<PlaylistItem> {
        self.items_by_playlist
            .get(&playlist_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    async fn get_audio_file(&self, audio_id: i64) -> Option<TrackMetadata> {
        self.tracks_by_audio_id.get(&audio_id).map(|v| v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_auth_provider_resolves_nothing() {
        let auth = NoopAuthProvider;
        assert!(auth.extract_user(Some("anything")).await.is_none());
    }

    fn track(audio_id: i64) -> TrackMetadata {
        TrackMetadata {
            audio_id,
            owner_id: 1,
            audio_uuid: "u".into(),
            filename: "f".into(),
            title: "t".into(),
            artist: "a".into(),
            duration: 120.0,
            qualities: vec!["flac".into()],
        }
    }

    #[tokio::test]
    async fn in_memory_persistence_resolves_seeded_playlist_and_track() {
        let persistence = InMemoryPersistence::new();
        persistence.seed_playlist(
            "ABCDEF12",
            7,
            vec![PlaylistItem {
                track_index: 0,
                audio_id: 55,
            }],
        );
        persistence.seed_track(track(55));

        let playlist_id = persistence.get_playlist_by_room("ABCDEF12").await.unwrap();
        assert_eq!(playlist_id, 7);
        let items = persistence.get_playlist_items(playlist_id).await;
        assert_eq!(items.len(), 1);
        let resolved = persistence.get_audio_file(items[0].audio_id).await.unwrap();
        assert_eq!(resolved.audio_id, 55);
    }

    #[tokio::test]
    async fn unseeded_lookups_return_none() {
        let persistence = InMemoryPersistence::new();
        assert!(persistence.get_playlist_by_room("NOPE0000").await.is_none());
        assert!(persistence.get_audio_file(404).await.is_none());
    }
}
