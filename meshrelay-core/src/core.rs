//! `Core`: the composition root. Owns one instance of every component and
//! the single executor loop that turns [`TransportEvent`]s into calls
//! against them — nothing outside this module ever touches more than one
//! component directly.
//!
//! Replaces the singleton registries an earlier design would reach for:
//! every handle here is owned, explicit, and constructed once at startup.

use std::sync::Arc;

use meshrelay_proto::ack::{AckId, DeliveryAck, ReadReceipt};
use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, RelayPublicKey, ShortPeerId, Timestamp};
use meshrelay_proto::message::MessageId;
use tokio::sync::mpsc;

use crate::chatstore::ChatStore;
use crate::config::CoreConfig;
use crate::lifecycle::{LifecycleController, LifecycleHooks, NoRelayHealthProbe, RelayHealthProbe};
use crate::outbox::Outbox;
use crate::peer::{PeerDirectory, PeerEvent, TransportKind};
use crate::router::Router;
use crate::tracker::DeliveryTracker;
use crate::transport::{Transport, TransportEvent};

/// Our own identity, needed to stamp outgoing acks and read receipts.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Our stable fingerprint.
    pub fingerprint: Fingerprint,
    /// Our display nickname, as shown to peers.
    pub nickname: String,
}

struct RouterHooks<M: Transport + 'static, R: Transport + 'static> {
    router: Arc<Router<M, R>>,
}

impl<M: Transport + 'static, R: Transport + 'static> LifecycleHooks for RouterHooks<M, R> {
    async fn cleanup_outbox(&self) {
        self.router.cleanup_expired(Timestamp::now()).await;
    }

    async fn flush_all(&self) {
        self.router.flush_all(Timestamp::now()).await;
    }
}

/// Owns every component and the event dispatch loop. Generic over the two
/// transport slots for the same reason [`Router`] is.
pub struct Core<M: Transport + 'static, R: Transport + 'static> {
    identity: LocalIdentity,
    peers: Arc<PeerDirectory>,
    outbox: Arc<Outbox>,
    tracker: Arc<DeliveryTracker>,
    router: Arc<Router<M, R>>,
    chatstore: Arc<ChatStore>,
    lifecycle: Option<LifecycleController>,
    events: mpsc::Receiver<TransportEvent>,
}

impl<M: Transport + 'static, R: Transport + 'static> Core<M, R> {
    /// Assembles a `Core` from already-constructed transports and
    /// configuration. `events` is the receiving half of the `mpsc` channel
    /// both transports were given their sending half of at construction.
    #[must_use]
    pub fn new(identity: LocalIdentity, mesh: Option<M>, relay: Option<R>, config: CoreConfig, events: mpsc::Receiver<TransportEvent>) -> Self {
        let peers = Arc::new(PeerDirectory::new());
        let outbox = Arc::new(Outbox::new());
        let tracker = Arc::new(DeliveryTracker::new());
        let chatstore = Arc::new(ChatStore::new());
        let router = Arc::new(Router::new(
            Arc::clone(&peers),
            Arc::clone(&outbox),
            Arc::clone(&tracker),
            mesh,
            relay,
            config.router,
        ));

        Self {
            identity,
            peers,
            outbox,
            tracker,
            router,
            chatstore,
            lifecycle: None,
            events,
        }
    }

    /// Spawns the lifecycle controller's timer tasks against this core's
    /// own components, using a no-op relay health probe. Call
    /// [`Self::spawn_lifecycle_with_probe`] instead when a relay transport
    /// is configured and its health should actually be probed.
    pub fn spawn_lifecycle(&mut self, config: crate::config::LifecycleConfig) {
        self.spawn_lifecycle_with_probe(config, Arc::new(NoRelayHealthProbe));
    }

    /// Spawns the lifecycle controller's timer tasks with an explicit relay
    /// health probe.
    pub fn spawn_lifecycle_with_probe<P: RelayHealthProbe + 'static>(&mut self, config: crate::config::LifecycleConfig, probe: Arc<P>) {
        let hooks = Arc::new(RouterHooks {
            router: Arc::clone(&self.router),
        });
        self.lifecycle = Some(LifecycleController::spawn(config, Arc::clone(&self.peers), Arc::clone(&self.tracker), hooks, probe));
    }

    /// Read-only access to the router, e.g. for a UI layer issuing sends.
    #[must_use]
    pub fn router(&self) -> &Arc<Router<M, R>> {
        &self.router
    }

    /// Read-only access to the chat store, e.g. for a UI layer rendering
    /// history.
    #[must_use]
    pub fn chatstore(&self) -> &Arc<ChatStore> {
        &self.chatstore
    }

    /// Read-only access to the peer directory.
    #[must_use]
    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    /// Read-only access to the outbox, e.g. for a UI layer showing pending
    /// sends.
    #[must_use]
    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Read-only access to the delivery tracker, e.g. for a UI layer
    /// showing per-message delivery state.
    #[must_use]
    pub fn tracker(&self) -> &Arc<DeliveryTracker> {
        &self.tracker
    }

    /// Processes a single [`TransportEvent`] already received from the
    /// channel. Exposed separately from [`Self::run`] so tests can drive
    /// the dispatch logic without an event loop.
    pub async fn handle_event(&self, event: TransportEvent) {
        let now = Timestamp::now();
        match event {
            TransportEvent::PeerConnected { .. } => {
                // Connectivity alone does not imply identity; the core
                // waits for `HandshakeCompleted` before treating a peer as
                // online for routing purposes.
            }
            TransportEvent::PeerDisconnected { short_peer_id, transport } => {
                if let Some(record) = self.peers.resolve_by_short(&short_peer_id).await {
                    self.chatstore.peer_went_offline(&record.fingerprint).await;
                    tracing::debug!(%short_peer_id, ?transport, "peer disconnected");
                }
            }
            TransportEvent::HandshakeCompleted { short_peer_id, fingerprint } => {
                if let Some(record) = self.peers.resolve_by_fingerprint(&fingerprint).await {
                    self.chatstore.peer_came_online(&fingerprint, record.nickname, short_peer_id).await;
                    self.router.reset_send_state_for(&fingerprint, now).await;
                    tracing::info!(%fingerprint, "peer online");
                }
            }
            TransportEvent::InboundMessage { sender_short, plaintext, message_id, is_group } => {
                self.on_inbound_message(sender_short, plaintext, message_id, is_group, now).await;
            }
            TransportEvent::InboundAck { ack } => {
                self.on_inbound_ack(ack, now).await;
            }
            TransportEvent::InboundDeliveryConfirmed { message_id, from } => {
                self.on_inbound_delivery_confirmed(message_id, from, now).await;
            }
            TransportEvent::InboundReceipt { receipt } => {
                if let Some(state) = self.tracker.on_read(&receipt).await {
                    tracing::info!(message_id = %receipt.original_message_id, ?state, "message read");
                }
            }
            TransportEvent::FavoriteStatusChanged { sender_short, on, peer_relay_key } => {
                self.on_favorite_status_changed(sender_short, on, peer_relay_key, now).await;
            }
        }
    }

    async fn on_inbound_message(&self, sender_short: ShortPeerId, plaintext: String, message_id: MessageId, is_group: bool, now: Timestamp) {
        let Some(record) = self.peers.resolve_by_short(&sender_short).await else {
            tracing::warn!(%sender_short, "inbound message from unknown peer, dropping");
            return;
        };

        let is_selected = self
            .chatstore
            .record_incoming(&record.fingerprint, record.nickname.clone(), message_id, plaintext, now)
            .await;

        let hops = u32::from(is_group);
        if let Some(ack) = self.tracker.generate_ack(message_id, self.identity.fingerprint.clone(), self.identity.nickname.clone(), hops).await
            && self.router.send_delivery_ack(ack, &record.fingerprint).await.is_err()
        {
            tracing::debug!(%message_id, "delivery ack not sent, will be regenerated on resend");
        }

        if is_selected {
            let receipt = ReadReceipt {
                receipt_id: AckId::new(),
                original_message_id: message_id,
                reader_id: self.identity.fingerprint.clone(),
                reader_nickname: self.identity.nickname.clone(),
                timestamp: now,
            };
            if self.router.send_read_receipt(receipt, &record.fingerprint, now).await.is_err() {
                tracing::debug!(%message_id, "read receipt not sent, will be regenerated on next read");
            }
        }
    }

    async fn on_inbound_ack(&self, ack: DeliveryAck, now: Timestamp) {
        let Some(state) = self.tracker.on_ack(&ack, now).await else {
            return;
        };
        tracing::info!(message_id = %ack.original_message_id, ?state, "ack applied");
        if matches!(state, crate::tracker::DeliveryState::Delivered { .. }) {
            self.router.confirm_delivery(ack.original_message_id).await;
        }
    }

    async fn on_inbound_delivery_confirmed(&self, message_id: MessageId, from: ShortPeerId, now: Timestamp) {
        let Some(record) = self.peers.resolve_by_short(&from).await else {
            tracing::warn!(%from, "delivery confirmation from unknown peer, dropping");
            return;
        };
        let Some(state) = self
            .tracker
            .on_delivery_confirmed(message_id, &record.fingerprint, &record.nickname, now)
            .await
        else {
            return;
        };
        tracing::info!(%message_id, ?state, "relay delivery confirmed");
        if matches!(state, crate::tracker::DeliveryState::Delivered { .. }) {
            self.router.confirm_delivery(message_id).await;
        }
    }

    async fn on_favorite_status_changed(&self, sender_short: ShortPeerId, on: bool, peer_relay_key: Option<RelayPublicKey>, now: Timestamp) {
        let Some(record) = self.peers.resolve_by_short(&sender_short).await else {
            tracing::warn!(%sender_short, "favorite notification from unknown peer, dropping");
            return;
        };
        let mut key_updated = false;
        if let Some(key) = peer_relay_key {
            key_updated = self
                .peers
                .observe_relay_key(&record.fingerprint, key.clone())
                .await
                .iter()
                .any(|e| matches!(e, PeerEvent::KeyUpdated { .. }));
            self.router.learn_relay_key(&sender_short, key).await;
        }
        tracing::info!(%sender_short, on, "peer favorite status changed");
        if key_updated {
            self.router.flush_outbox(&record.fingerprint, now).await;
        }
    }

    /// Drains the transport event channel until every sender is dropped,
    /// dispatching each event as it arrives. This is the single executor
    /// loop the whole crate's concurrency model assumes — no other task
    /// mutates `peers`/`outbox`/`tracker`/`chatstore` directly.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("core event loop exiting: all transports dropped");
    }

    /// Awaits and dispatches exactly one transport event. Returns `false`
    /// once every transport's event sender has dropped, `true` otherwise.
    /// An alternative to [`Self::run`] for a caller that wants to interleave
    /// dispatch with other work on the same task instead of handing this
    /// core its own.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Registers a peer's handshake completion manually, for callers that
    /// learn identity out of band from a transport event (e.g. a static
    /// configuration of known peers loaded at startup).
    pub async fn observe_peer(&self, short_peer_id: ShortPeerId, key: &NoisePublicKey, nickname: impl Into<String>, transport: TransportKind) -> Vec<PeerEvent> {
        self.peers.observe_handshake(short_peer_id, key, nickname, transport, None, Timestamp::now()).await
    }
}
