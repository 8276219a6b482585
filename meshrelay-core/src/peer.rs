//! Peer Directory: the single source of truth translating between a
//! peer's ephemeral mesh handle, its stable fingerprint, and its relay
//! identity.
//!
//! Everything else in the router reads peers through here rather than
//! holding its own peer state — transports only ever see a read-only view.

use std::collections::HashMap;

use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, RelayPublicKey, ShortPeerId, Timestamp};
use tokio::sync::Mutex;

/// Which transport a piece of peer state was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// The short-range mesh transport.
    Mesh,
    /// The relay transport.
    Relay,
}

/// How long a per-transport visibility entry is trusted without a fresh
/// observation before it is pruned. The [`PeerRecord`] itself survives.
pub const STALE_VISIBILITY_MS: u64 = 5 * 60 * 1_000;

/// Everything the directory knows about one long-lived identity.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Stable identity; primary key.
    pub fingerprint: Fingerprint,
    /// Current ephemeral mesh handle for this peer.
    pub short_peer_id: ShortPeerId,
    /// Relay identity, once learned via a favorites exchange.
    pub relay_public_key: Option<RelayPublicKey>,
    /// Last-seen display nickname.
    pub nickname: String,
    /// Whether the local user has bookmarked this peer.
    pub favorite: bool,
    /// Whether the local user has blocked this peer.
    pub blocked: bool,
    last_seen: HashMap<TransportKind, Timestamp>,
    rssi: HashMap<TransportKind, i32>,
}

impl PeerRecord {
    fn new(fingerprint: Fingerprint, short_peer_id: ShortPeerId, nickname: String) -> Self {
        Self {
            fingerprint,
            short_peer_id,
            relay_public_key: None,
            nickname,
            favorite: false,
            blocked: false,
            last_seen: HashMap::new(),
            rssi: HashMap::new(),
        }
    }

    /// Returns the last time this peer was observed on `transport`, if ever.
    #[must_use]
    pub fn last_seen_on(&self, transport: TransportKind) -> Option<Timestamp> {
        self.last_seen.get(&transport).copied()
    }

    /// Returns the most recently observed signal strength on `transport`.
    #[must_use]
    pub fn rssi_on(&self, transport: TransportKind) -> Option<i32> {
        self.rssi.get(&transport).copied()
    }

    /// True if this peer has a fresh (non-stale) sighting on any transport.
    #[must_use]
    pub fn is_visible(&self, now: Timestamp) -> bool {
        self.last_seen
            .values()
            .any(|seen| now.elapsed_since(*seen) < STALE_VISIBILITY_MS)
    }

    /// Rebuilds a bare record from a persisted snapshot: identity,
    /// nickname, and bookmarks, but no per-transport visibility — that is
    /// re-learned from fresh sightings after restart.
    #[must_use]
    pub fn hydrate(
        fingerprint: Fingerprint,
        short_peer_id: ShortPeerId,
        relay_public_key: Option<RelayPublicKey>,
        nickname: String,
        favorite: bool,
        blocked: bool,
    ) -> Self {
        Self {
            fingerprint,
            short_peer_id,
            relay_public_key,
            nickname,
            favorite,
            blocked,
            last_seen: HashMap::new(),
            rssi: HashMap::new(),
        }
    }
}

/// Change notifications the router listens for to decide when to re-flush
/// a peer's outbox or otherwise react.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// A favorited peer reappeared under a new mesh handle or with a new
    /// relay key; the fingerprint is unchanged but routing state should be
    /// re-evaluated.
    KeyUpdated { fingerprint: Fingerprint },
    /// The local favorite/block bookmark for a peer changed.
    FavoriteChanged { fingerprint: Fingerprint, favorite: bool },
    /// A peer became visible on a transport it was not visible on before.
    BecameOnline { fingerprint: Fingerprint, transport: TransportKind },
    /// A peer's visibility on a transport expired (stale pruning or
    /// an explicit disconnect observation).
    BecameOffline { fingerprint: Fingerprint, transport: TransportKind },
}

struct State {
    by_fingerprint: HashMap<Fingerprint, PeerRecord>,
    short_to_fingerprint: HashMap<ShortPeerId, Fingerprint>,
    relay_to_fingerprint: HashMap<RelayPublicKey, Fingerprint>,
}

/// Identity ↔ ephemeral-handle resolution, transport visibility, and
/// favorite/block bookkeeping for every known peer.
pub struct PeerDirectory {
    state: Mutex<State>,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                by_fingerprint: HashMap::new(),
                short_to_fingerprint: HashMap::new(),
                relay_to_fingerprint: HashMap::new(),
            }),
        }
    }

    /// Looks up a peer by its stable fingerprint.
    pub async fn resolve_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<PeerRecord> {
        self.state.lock().await.by_fingerprint.get(fingerprint).cloned()
    }

    /// Looks up a peer by its current mesh handle.
    pub async fn resolve_by_short(&self, short_peer_id: &ShortPeerId) -> Option<PeerRecord> {
        let state = self.state.lock().await;
        let fingerprint = state.short_to_fingerprint.get(short_peer_id)?;
        state.by_fingerprint.get(fingerprint).cloned()
    }

    /// Looks up a peer by its relay identity.
    pub async fn resolve_by_relay(&self, relay_public_key: &RelayPublicKey) -> Option<PeerRecord> {
        let state = self.state.lock().await;
        let fingerprint = state.relay_to_fingerprint.get(relay_public_key)?;
        state.by_fingerprint.get(fingerprint).cloned()
    }

    /// Records that a peer with the given long-lived identity key completed
    /// a handshake (or re-announced itself) under `short_peer_id` on
    /// `transport`. Creates the record on first sighting.
    ///
    /// Emits [`PeerEvent::KeyUpdated`] when the peer's mesh handle changed
    /// since the last observation, and [`PeerEvent::BecameOnline`] when the
    /// peer was not already visible on this transport.
    pub async fn observe_handshake(
        &self,
        short_peer_id: ShortPeerId,
        key: &NoisePublicKey,
        nickname: impl Into<String>,
        transport: TransportKind,
        rssi: Option<i32>,
        now: Timestamp,
    ) -> Vec<PeerEvent> {
        let fingerprint = Fingerprint::of(key);
        let mut state = self.state.lock().await;
        let mut events = Vec::new();

        let was_visible = state
            .by_fingerprint
            .get(&fingerprint)
            .is_some_and(|r| r.is_visible(now));

        let nickname = nickname.into();
        let record = state
            .by_fingerprint
            .entry(fingerprint.clone())
            .or_insert_with(|| PeerRecord::new(fingerprint.clone(), short_peer_id.clone(), nickname.clone()));

        if record.short_peer_id != short_peer_id {
            record.short_peer_id = short_peer_id.clone();
            events.push(PeerEvent::KeyUpdated {
                fingerprint: fingerprint.clone(),
            });
        }
        record.nickname = nickname;
        record.last_seen.insert(transport, now);
        if let Some(rssi) = rssi {
            record.rssi.insert(transport, rssi);
        }

        state.short_to_fingerprint.insert(short_peer_id, fingerprint.clone());

        if !was_visible {
            events.push(PeerEvent::BecameOnline {
                fingerprint,
                transport,
            });
        }

        events
    }

    /// Records that a peer's relay identity was learned or changed, e.g.
    /// via a `FAVORITED:`/`UNFAVORITED:` exchange.
    ///
    /// Emits [`PeerEvent::KeyUpdated`] when the relay key is new or changed.
    pub async fn observe_relay_key(
        &self,
        fingerprint: &Fingerprint,
        relay_public_key: RelayPublicKey,
    ) -> Vec<PeerEvent> {
        let mut state = self.state.lock().await;
        let Some(record) = state.by_fingerprint.get_mut(fingerprint) else {
            return Vec::new();
        };

        if record.relay_public_key.as_ref() == Some(&relay_public_key) {
            return Vec::new();
        }

        record.relay_public_key = Some(relay_public_key.clone());
        state.relay_to_fingerprint.insert(relay_public_key, fingerprint.clone());

        vec![PeerEvent::KeyUpdated {
            fingerprint: fingerprint.clone(),
        }]
    }

    /// Sets or clears the local favorite bookmark for a peer.
    pub async fn set_favorite(&self, fingerprint: &Fingerprint, favorite: bool) -> Vec<PeerEvent> {
        let mut state = self.state.lock().await;
        let Some(record) = state.by_fingerprint.get_mut(fingerprint) else {
            return Vec::new();
        };
        if record.favorite == favorite {
            return Vec::new();
        }
        record.favorite = favorite;
        vec![PeerEvent::FavoriteChanged {
            fingerprint: fingerprint.clone(),
            favorite,
        }]
    }

    /// Sets or clears the local block flag for a peer.
    pub async fn set_blocked(&self, fingerprint: &Fingerprint, blocked: bool) {
        if let Some(record) = self.state.lock().await.by_fingerprint.get_mut(fingerprint) {
            record.blocked = blocked;
        }
    }

    /// Returns whether a peer is currently blocked. Unknown peers are
    /// never blocked.
    pub async fn is_blocked(&self, fingerprint: &Fingerprint) -> bool {
        self.state
            .lock()
            .await
            .by_fingerprint
            .get(fingerprint)
            .is_some_and(|r| r.blocked)
    }

    /// Returns the fingerprints of every peer with a fresh sighting on
    /// `transport`.
    pub async fn peers_visible_on(&self, transport: TransportKind, now: Timestamp) -> Vec<Fingerprint> {
        self.state
            .lock()
            .await
            .by_fingerprint
            .values()
            .filter(|r| {
                r.last_seen_on(transport)
                    .is_some_and(|seen| now.elapsed_since(seen) < STALE_VISIBILITY_MS)
            })
            .map(|r| r.fingerprint.clone())
            .collect()
    }

    /// Drops per-transport visibility entries older than
    /// [`STALE_VISIBILITY_MS`]. The underlying [`PeerRecord`] is retained
    /// regardless (favorited or not — only explicit panic wipe removes it).
    ///
    /// Returns [`PeerEvent::BecameOffline`] for every (peer, transport) pair
    /// pruned this pass.
    pub async fn prune_stale(&self, now: Timestamp) -> Vec<PeerEvent> {
        let mut state = self.state.lock().await;
        let mut events = Vec::new();
        for record in state.by_fingerprint.values_mut() {
            let stale: Vec<TransportKind> = record
                .last_seen
                .iter()
                .filter(|(_, seen)| now.elapsed_since(**seen) >= STALE_VISIBILITY_MS)
                .map(|(t, _)| *t)
                .collect();
            for transport in stale {
                record.last_seen.remove(&transport);
                record.rssi.remove(&transport);
                events.push(PeerEvent::BecameOffline {
                    fingerprint: record.fingerprint.clone(),
                    transport,
                });
            }
        }
        events
    }

    /// Erases every peer record. Called only from a user-triggered panic
    /// wipe; never invoked as part of normal cleanup.
    pub async fn panic_wipe(&self) {
        let mut state = self.state.lock().await;
        state.by_fingerprint.clear();
        state.short_to_fingerprint.clear();
        state.relay_to_fingerprint.clear();
    }

    /// Returns every known record, for a persistence snapshot.
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.state.lock().await.by_fingerprint.values().cloned().collect()
    }

    /// Replaces the directory's contents with hydrated records, e.g. after
    /// loading a persistence snapshot at startup. Per-transport visibility
    /// is empty for every restored record until fresh sightings arrive.
    pub async fn restore(&self, records: Vec<PeerRecord>) {
        let mut state = self.state.lock().await;
        state.by_fingerprint.clear();
        state.short_to_fingerprint.clear();
        state.relay_to_fingerprint.clear();
        for record in records {
            state.short_to_fingerprint.insert(record.short_peer_id.clone(), record.fingerprint.clone());
            if let Some(relay_key) = record.relay_public_key.clone() {
                state.relay_to_fingerprint.insert(relay_key, record.fingerprint.clone());
            }
            state.by_fingerprint.insert(record.fingerprint.clone(), record);
        }
    }
}
