//! Persistence: a key/value consumer contract plus the JSON snapshot
//! shapes the core reads and writes through it.
//!
//! Any store with atomic `set`/`get` of opaque bytes is enough — this
//! module only defines what goes *in* those bytes. Encoding is JSON
//! (`serde_json`, already a dependency for the wire-adjacent types)
//! because persistence compatibility across versions is explicitly not
//! required, unlike the relay wire format in `meshrelay_proto::wire`.

use std::collections::HashMap;

use meshrelay_proto::identity::{Fingerprint, RelayPublicKey, ShortPeerId, Timestamp};
use meshrelay_proto::message::MessageId;
use serde::{Deserialize, Serialize};

use crate::chatstore::{ChatRoom, ChatStore, Direction, StoredMessage};
use crate::peer::{PeerDirectory, PeerRecord};

/// Storage key for the peer directory snapshot.
pub const KEY_PEERS: &str = "peers";
/// Storage key for the chat room snapshot.
pub const KEY_CHAT_ROOMS: &str = "chat_rooms";
/// Storage key for the pending-invitations blob (opaque to this crate;
/// group membership bookkeeping lives outside the router's scope — this
/// key exists only so the key/value round-trips without data loss).
pub const KEY_PENDING_INVITATIONS: &str = "pending_invitations";
/// Storage key for the currently selected chat room.
pub const KEY_SELECTED_ROOM: &str = "selected_room";

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying key/value store failed to read or write.
    #[error("store I/O error: {0}")]
    Io(String),
    /// The stored bytes did not decode as the expected JSON shape.
    #[error("deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// An atomic key/value store. Implementations need no transactional
/// guarantees beyond single-key atomicity.
pub trait KvStore: Send + Sync {
    /// Writes `bytes` under `key`, replacing any previous value.
    fn set(&self, key: &str, bytes: Vec<u8>) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Reads the bytes stored under `key`, if any.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;
}

/// An in-memory [`KvStore`] test double.
#[derive(Default)]
pub struct InMemoryKvStore {
    data: tokio::sync::Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for InMemoryKvStore {
    async fn set(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.data.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.lock().await.get(key).cloned())
    }
}

/// JSON-serializable form of a [`PeerRecord`], decoupled from the live
/// struct's internal representation so the in-memory type is free to
/// evolve without a persistence-format migration story (none is promised).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub fingerprint: String,
    pub short_peer_id: String,
    pub relay_public_key: Option<String>,
    pub nickname: String,
    pub favorite: bool,
    pub blocked: bool,
}

impl From<&PeerRecord> for PeerSnapshot {
    fn from(record: &PeerRecord) -> Self {
        Self {
            fingerprint: record.fingerprint.as_str().to_string(),
            short_peer_id: record.short_peer_id.as_str().to_string(),
            relay_public_key: record.relay_public_key.as_ref().map(|k| k.as_str().to_string()),
            nickname: record.nickname.clone(),
            favorite: record.favorite,
            blocked: record.blocked,
        }
    }
}

impl PeerSnapshot {
    /// Rehydrates a bare [`PeerRecord`] (no per-transport visibility —
    /// that is re-learned from fresh sightings after restart).
    #[must_use]
    pub fn hydrate(&self) -> PeerRecord {
        PeerRecord::hydrate(
            Fingerprint::from_hex(self.fingerprint.clone()),
            ShortPeerId::new(self.short_peer_id.clone()),
            self.relay_public_key.clone().map(RelayPublicKey::new),
            self.nickname.clone(),
            self.favorite,
            self.blocked,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessageSnapshot {
    message_id: String,
    incoming: bool,
    content: String,
    nickname: String,
    at: u64,
}

impl From<&StoredMessage> for StoredMessageSnapshot {
    fn from(m: &StoredMessage) -> Self {
        Self {
            message_id: m.message_id.to_string(),
            incoming: matches!(m.direction, Direction::Incoming),
            content: m.content.clone(),
            nickname: m.nickname.clone(),
            at: m.at.as_millis(),
        }
    }
}

/// JSON-serializable form of a [`ChatRoom`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoomSnapshot {
    pub fingerprint: String,
    pub nickname: String,
    pub current_short_peer_id: Option<String>,
    history: Vec<StoredMessageSnapshot>,
}

impl From<&ChatRoom> for ChatRoomSnapshot {
    fn from(room: &ChatRoom) -> Self {
        Self {
            fingerprint: room.fingerprint.as_str().to_string(),
            nickname: room.nickname.clone(),
            current_short_peer_id: room.current_short_peer_id.as_ref().map(|s| s.as_str().to_string()),
            history: room.history().iter().map(StoredMessageSnapshot::from).collect(),
        }
    }
}

/// Serializes the peer directory to JSON bytes suitable for
/// `KvStore::set(KEY_PEERS, ...)`.
///
/// # Errors
///
/// Returns [`StoreError::Serde`] if JSON encoding fails (never expected for
/// this shape, but kept fallible for symmetry with `load_peers`).
pub async fn snapshot_peers(directory: &PeerDirectory) -> Result<Vec<u8>, StoreError> {
    let snapshots: Vec<PeerSnapshot> = directory.snapshot().await.iter().map(PeerSnapshot::from).collect();
    Ok(serde_json::to_vec(&snapshots)?)
}

/// Deserializes and restores a peer directory snapshot written by
/// [`snapshot_peers`].
///
/// # Errors
///
/// Returns [`StoreError::Serde`] if `bytes` is not a valid peer snapshot.
pub async fn restore_peers(directory: &PeerDirectory, bytes: &[u8]) -> Result<(), StoreError> {
    let snapshots: Vec<PeerSnapshot> = serde_json::from_slice(bytes)?;
    directory.restore(snapshots.iter().map(PeerSnapshot::hydrate).collect()).await;
    Ok(())
}

/// Serializes every chat room to JSON bytes suitable for
/// `KvStore::set(KEY_CHAT_ROOMS, ...)`.
///
/// # Errors
///
/// Returns [`StoreError::Serde`] if JSON encoding fails.
pub async fn snapshot_chat_rooms(store: &ChatStore) -> Result<Vec<u8>, StoreError> {
    let mut snapshots = Vec::new();
    for fingerprint in store.all_fingerprints().await {
        if let Some(room) = store.get(&fingerprint).await {
            snapshots.push(ChatRoomSnapshot::from(&room));
        }
    }
    Ok(serde_json::to_vec(&snapshots)?)
}

/// Restores chat rooms (identity, nickname, mesh handle, and bounded
/// history) from a snapshot written by [`snapshot_chat_rooms`].
///
/// # Errors
///
/// Returns [`StoreError::Serde`] if `bytes` is not a valid room snapshot.
pub async fn restore_chat_rooms(store: &ChatStore, bytes: &[u8]) -> Result<(), StoreError> {
    let snapshots: Vec<ChatRoomSnapshot> = serde_json::from_slice(bytes)?;
    for snapshot in snapshots {
        let fingerprint = Fingerprint::from_hex(snapshot.fingerprint);
        let short_peer_id = snapshot.current_short_peer_id.map(ShortPeerId::new);
        store.get_or_create(&fingerprint, snapshot.nickname, short_peer_id).await;
        for message in snapshot.history {
            let message_id: MessageId = message.message_id.parse().unwrap_or_default();
            let at = Timestamp::from_millis(message.at);
            if message.incoming {
                store
                    .record_incoming(&fingerprint, message.nickname, message_id, message.content, at)
                    .await;
            } else {
                store
                    .record_outgoing(&fingerprint, message_id, message.content, message.nickname, at)
                    .await;
            }
        }
    }
    Ok(())
}
