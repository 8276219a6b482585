//! Persistent Chat Store: fingerprint-keyed chat rooms that survive
//! `short_peer_id` churn.
//!
//! A room is created the first time we see or send to a fingerprint and is
//! never implicitly deleted — only [`ChatStore::delete_room`] and
//! [`ChatStore::panic_wipe`] remove one. Bounded history keeps each room's
//! memory footprint flat regardless of conversation length.
//!
//! Rooms are keyed and addressed by fingerprint rather than by
//! `short_peer_id` — the store's own invariant ("keyed on fingerprint")
//! makes that the natural key, and the composition root already holds a
//! `short_peer_id -> fingerprint` mapping via [`crate::peer::PeerDirectory`]
//! to resolve incoming transport events before calling in here. There is no
//! separate pending-send queue on the room itself: [`crate::outbox::Outbox`]
//! already queues first and replays in insertion order on reconnect, so a
//! second parallel queue here would just be redundant bookkeeping. See
//! DESIGN.md.

use std::collections::{HashMap, VecDeque};

use meshrelay_proto::identity::{Fingerprint, ShortPeerId, Timestamp};
use meshrelay_proto::message::MessageId;
use tokio::sync::Mutex;

/// Maximum number of messages retained per room before FIFO eviction.
pub const HISTORY_CAPACITY: usize = 1_000;

/// Which direction a stored message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the peer.
    Incoming,
    /// Sent by the local user.
    Outgoing,
}

/// A single message retained in a room's bounded history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Identifier shared with the outbox/tracker record for this message.
    pub message_id: MessageId,
    /// Which direction this message travelled.
    pub direction: Direction,
    /// Message text.
    pub content: String,
    /// Display nickname of whoever sent it, at send/receive time.
    pub nickname: String,
    /// When this message was recorded.
    pub at: Timestamp,
}

/// One peer's persistent chat room.
#[derive(Debug, Clone)]
pub struct ChatRoom {
    /// Stable identity this room is keyed on.
    pub fingerprint: Fingerprint,
    /// Last-seen display nickname.
    pub nickname: String,
    /// The peer's current mesh handle, if known.
    pub current_short_peer_id: Option<ShortPeerId>,
    /// Whether the peer is presently visible on any transport.
    pub is_online: bool,
    history: VecDeque<StoredMessage>,
}

impl ChatRoom {
    fn new(fingerprint: Fingerprint, nickname: String, current_short_peer_id: Option<ShortPeerId>) -> Self {
        Self {
            fingerprint,
            nickname,
            current_short_peer_id,
            is_online: false,
            history: VecDeque::new(),
        }
    }

    fn push(&mut self, message: StoredMessage) {
        self.history.push_back(message);
        if self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }

    /// The room's message history, oldest first.
    #[must_use]
    pub fn history(&self) -> &VecDeque<StoredMessage> {
        &self.history
    }
}

struct State {
    rooms: HashMap<Fingerprint, ChatRoom>,
    selected: Option<Fingerprint>,
}

/// Owns every fingerprint-keyed chat room.
pub struct ChatStore {
    state: Mutex<State>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates an empty store with no room selected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                rooms: HashMap::new(),
                selected: None,
            }),
        }
    }

    /// Returns the room for `fingerprint`, creating it (with the given
    /// nickname and mesh handle) if this is the first time we've seen it.
    pub async fn get_or_create(
        &self,
        fingerprint: &Fingerprint,
        nickname: impl Into<String>,
        current_short_peer_id: Option<ShortPeerId>,
    ) -> ChatRoom {
        let mut state = self.state.lock().await;
        let room = state
            .rooms
            .entry(fingerprint.clone())
            .or_insert_with(|| ChatRoom::new(fingerprint.clone(), nickname.into(), current_short_peer_id.clone()));
        if current_short_peer_id.is_some() {
            room.current_short_peer_id = current_short_peer_id;
        }
        room.clone()
    }

    /// Records an inbound message in its room's history (creating the room
    /// if needed). Returns `true` if this room is the currently selected
    /// one, so the caller knows to send a read receipt.
    pub async fn record_incoming(
        &self,
        fingerprint: &Fingerprint,
        nickname: impl Into<String>,
        message_id: MessageId,
        content: impl Into<String>,
        at: Timestamp,
    ) -> bool {
        let mut state = self.state.lock().await;
        let nickname = nickname.into();
        let room = state
            .rooms
            .entry(fingerprint.clone())
            .or_insert_with(|| ChatRoom::new(fingerprint.clone(), nickname.clone(), None));
        room.nickname = nickname.clone();
        room.push(StoredMessage {
            message_id,
            direction: Direction::Incoming,
            content: content.into(),
            nickname,
            at,
        });
        state.selected.as_ref() == Some(fingerprint)
    }

    /// Records a locally sent message in its room's history. Sending
    /// itself is the router's job; this only keeps the room's display
    /// history in sync.
    pub async fn record_outgoing(
        &self,
        fingerprint: &Fingerprint,
        message_id: MessageId,
        content: impl Into<String>,
        nickname: impl Into<String>,
        at: Timestamp,
    ) {
        let mut state = self.state.lock().await;
        let nickname = nickname.into();
        let room = state
            .rooms
            .entry(fingerprint.clone())
            .or_insert_with(|| ChatRoom::new(fingerprint.clone(), nickname.clone(), None));
        room.push(StoredMessage {
            message_id,
            direction: Direction::Outgoing,
            content: content.into(),
            nickname,
            at,
        });
    }

    /// Marks a room's peer online under the given mesh handle and
    /// nickname. The caller (composition root) is responsible for then
    /// telling the router to reset send state and flush the outbox — this
    /// store only tracks room-local presence and identity.
    pub async fn peer_came_online(&self, fingerprint: &Fingerprint, nickname: impl Into<String>, short_peer_id: ShortPeerId) {
        let mut state = self.state.lock().await;
        let nickname = nickname.into();
        let room = state
            .rooms
            .entry(fingerprint.clone())
            .or_insert_with(|| ChatRoom::new(fingerprint.clone(), nickname.clone(), Some(short_peer_id.clone())));
        room.is_online = true;
        room.nickname = nickname;
        room.current_short_peer_id = Some(short_peer_id);
    }

    /// Marks a room's peer offline.
    pub async fn peer_went_offline(&self, fingerprint: &Fingerprint) {
        if let Some(room) = self.state.lock().await.rooms.get_mut(fingerprint) {
            room.is_online = false;
        }
    }

    /// Selects a room as the one currently displayed in the UI, or clears
    /// the selection with `None`.
    pub async fn select_room(&self, fingerprint: Option<Fingerprint>) {
        self.state.lock().await.selected = fingerprint;
    }

    /// True if `fingerprint` is the currently selected room.
    pub async fn is_selected(&self, fingerprint: &Fingerprint) -> bool {
        self.state.lock().await.selected.as_ref() == Some(fingerprint)
    }

    /// Returns a clone of a room's current state, if it exists.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<ChatRoom> {
        self.state.lock().await.rooms.get(fingerprint).cloned()
    }

    /// Permanently deletes one room and its history.
    pub async fn delete_room(&self, fingerprint: &Fingerprint) {
        let mut state = self.state.lock().await;
        state.rooms.remove(fingerprint);
        if state.selected.as_ref() == Some(fingerprint) {
            state.selected = None;
        }
    }

    /// Erases every room. Called only from a user-triggered panic wipe.
    pub async fn panic_wipe(&self) {
        let mut state = self.state.lock().await;
        state.rooms.clear();
        state.selected = None;
    }

    /// All known room fingerprints, for persistence snapshots.
    pub async fn all_fingerprints(&self) -> Vec<Fingerprint> {
        self.state.lock().await.rooms.keys().cloned().collect()
    }
}
