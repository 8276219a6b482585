//! Relay (Nostr-over-Tor) transport: reachability-driven. A send can be
//! attempted whenever the recipient's `relay_public_key` is known, with no
//! notion of an open link — the relay server (and SOCKS proxy) queue for
//! offline recipients on our behalf.
//!
//! The real Tor SOCKS proxy, Nostr relay websocket, and NIP-17 gift-wrap
//! crypto live outside this crate; [`RelayLink`] is the narrow seam.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use meshrelay_proto::ack::ReadReceipt;
use meshrelay_proto::identity::{RelayPublicKey, ShortPeerId};
use meshrelay_proto::message::MessageId;
use meshrelay_proto::wire::RelayFrame;

use crate::peer::TransportKind;

use super::{Transport, TransportError, TransportEvent};

/// Stand-in for the Tor SOCKS proxy + Nostr relay websocket. Addressing is
/// implicit, as it is on a real relay — the NIP-17 envelope (out of scope)
/// carries the recipient, not the wire text itself.
pub trait RelayLink: Send + Sync {
    fn is_reachable(&self) -> bool;

    fn send_text(&self, payload: String) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Waits for the next inbound frame along with the short id of whoever
    /// sent it, as attested by the (out-of-scope) crypto layer.
    fn recv_text(&self) -> impl std::future::Future<Output = Option<(ShortPeerId, String)>> + Send;
}

/// An in-process broadcast bus standing in for a relay server: every
/// participant that joins receives every other participant's published
/// text, exactly as a real Nostr relay fans a published event out to all
/// subscribers.
pub struct InProcessRelayBus {
    subscribers: Mutex<Vec<mpsc::Sender<(ShortPeerId, String)>>>,
}

impl InProcessRelayBus {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { subscribers: Mutex::new(Vec::new()) })
    }

    /// Joins the bus under `local`'s identity, returning a link that
    /// publishes as `local` and receives everyone else's publications.
    #[must_use]
    pub fn join(self: &Arc<Self>, local: ShortPeerId) -> InProcessRelayLink {
        let (tx, rx) = mpsc::channel(64);
        let id = {
            let mut subs = self.subscribers.lock();
            subs.push(tx);
            subs.len() - 1
        };
        InProcessRelayLink {
            bus: Arc::clone(self),
            id,
            local,
            rx: tokio::sync::Mutex::new(rx),
            reachable: Arc::new(Mutex::new(true)),
        }
    }
}

/// A single participant's handle onto an [`InProcessRelayBus`].
pub struct InProcessRelayLink {
    bus: Arc<InProcessRelayBus>,
    id: usize,
    local: ShortPeerId,
    rx: tokio::sync::Mutex<mpsc::Receiver<(ShortPeerId, String)>>,
    reachable: Arc<Mutex<bool>>,
}

impl InProcessRelayLink {
    pub fn set_reachable(&self, reachable: bool) {
        *self.reachable.lock() = reachable;
    }
}

impl RelayLink for InProcessRelayLink {
    fn is_reachable(&self) -> bool {
        *self.reachable.lock()
    }

    async fn send_text(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_reachable() {
            return Err(TransportError::SocksUnavailable);
        }
        let subs = self.bus.subscribers.lock().clone();
        for (idx, tx) in subs.iter().enumerate() {
            if idx == self.id {
                continue;
            }
            let _ = tx.send((self.local.clone(), payload.clone())).await;
        }
        Ok(())
    }

    async fn recv_text(&self) -> Option<(ShortPeerId, String)> {
        self.rx.lock().await.recv().await
    }
}

/// [`Transport`] implementation over a [`RelayLink`].
///
/// Tracks each peer's `relay_public_key` as learned from favorites
/// exchanges (via [`Self::set_relay_key`], called by the router once the
/// peer directory resolves one) — sending requires a known key because the
/// real crypto layer needs it to address the gift-wrap envelope, even
/// though this stand-in's wire text carries no recipient field.
pub struct RelayTransport<L: RelayLink + 'static> {
    link: Arc<L>,
    keys: Mutex<HashMap<ShortPeerId, RelayPublicKey>>,
    reader: tokio::task::JoinHandle<()>,
}

impl<L: RelayLink + 'static> RelayTransport<L> {
    pub fn new(link: L, events: mpsc::Sender<TransportEvent>) -> Self {
        let link = Arc::new(link);
        let reader_link = Arc::clone(&link);
        let reader = tokio::spawn(reader_loop(reader_link, events));
        Self { link, keys: Mutex::new(HashMap::new()), reader }
    }

    pub fn set_relay_key(&self, short_peer_id: ShortPeerId, key: RelayPublicKey) {
        self.keys.lock().insert(short_peer_id, key);
    }

    fn require_key(&self, to: &ShortPeerId) -> Result<(), TransportError> {
        if self.keys.lock().contains_key(to) {
            Ok(())
        } else {
            Err(TransportError::Unreachable(to.clone()))
        }
    }

    async fn send_frame(&self, to: &ShortPeerId, frame: RelayFrame) -> Result<(), TransportError> {
        if !self.link.is_reachable() {
            return Err(TransportError::SocksUnavailable);
        }
        self.require_key(to)?;
        self.link.send_text(frame.encode()).await
    }
}

impl<L: RelayLink + 'static> Drop for RelayTransport<L> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn reader_loop<L: RelayLink>(link: Arc<L>, events: mpsc::Sender<TransportEvent>) {
    while let Some((from, text)) = link.recv_text().await {
        let frame = match RelayFrame::parse(&text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(%from, %err, "malformed relay frame, skipping");
                continue;
            }
        };
        let event = match frame {
            RelayFrame::Message { message_id, content } => TransportEvent::InboundMessage {
                sender_short: from,
                plaintext: content,
                message_id,
                is_group: false,
            },
            RelayFrame::Delivered { message_id } => {
                TransportEvent::InboundDeliveryConfirmed { message_id, from }
            }
            RelayFrame::Read { receipt } => TransportEvent::InboundReceipt { receipt },
            RelayFrame::Favorite { peer_relay_key, on } => TransportEvent::FavoriteStatusChanged {
                sender_short: from,
                on,
                peer_relay_key: Some(peer_relay_key),
            },
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
    tracing::debug!("relay reader task exiting");
}

impl<L: RelayLink + 'static> Transport for RelayTransport<L> {
    /// Relay has no link-level per-peer connectivity; this reports whether
    /// the relay/SOCKS path is up at all.
    fn is_peer_connected(&self, _short_peer_id: &ShortPeerId) -> bool {
        self.link.is_reachable()
    }

    fn is_peer_reachable(&self, short_peer_id: &ShortPeerId) -> bool {
        self.link.is_reachable() && self.keys.lock().contains_key(short_peer_id)
    }

    async fn send_private(
        &self,
        message_id: MessageId,
        content: &str,
        to: &ShortPeerId,
        _nickname: &str,
    ) -> Result<(), TransportError> {
        self.send_frame(to, RelayFrame::Message { message_id, content: content.to_string() }).await
    }

    async fn send_delivery_ack(
        &self,
        ack: meshrelay_proto::ack::DeliveryAck,
        to: &ShortPeerId,
    ) -> Result<(), TransportError> {
        self.send_frame(to, RelayFrame::Delivered { message_id: ack.original_message_id }).await
    }

    async fn send_read_receipt(&self, receipt: ReadReceipt, to: &ShortPeerId) -> Result<(), TransportError> {
        self.send_frame(to, RelayFrame::Read { receipt }).await
    }

    async fn send_favorite_notification(&self, to: &ShortPeerId, on: bool) -> Result<(), TransportError> {
        let key = self
            .keys
            .lock()
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(to.clone()))?;
        if !self.link.is_reachable() {
            return Err(TransportError::SocksUnavailable);
        }
        self.link.send_text(RelayFrame::Favorite { peer_relay_key: key, on }.encode()).await
    }

    async fn trigger_handshake(&self, _to: &ShortPeerId) -> Result<(), TransportError> {
        // The relay transport has no handshake of its own to trigger —
        // per-message encryption is handled entirely by the (out of
        // scope) NIP-17 layer above this transport.
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn learn_relay_key(&self, short_peer_id: ShortPeerId, key: RelayPublicKey) {
        self.set_relay_key(short_peer_id, key);
    }
}
