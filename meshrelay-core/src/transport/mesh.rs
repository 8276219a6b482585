//! Mesh (BLE-style) transport: connectivity-driven. A send is only
//! attempted when the link reports the peer connected *and* a secure
//! session with it has finished negotiating.
//!
//! Real GATT connection management and the Noise handshake live outside
//! this crate; [`MeshLink`] and [`SecureSession`] are the narrow seams
//! through which that world is observed. Inbound bytes are decoded on a
//! background reader task and handed to the core as [`TransportEvent`]s,
//! the same shape `RelayTransport`'s reader task uses.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use meshrelay_proto::ack::{DeliveryAck, ReadReceipt};
use meshrelay_proto::identity::ShortPeerId;
use meshrelay_proto::message::MessageId;

use crate::peer::TransportKind;

use super::{Transport, TransportError, TransportEvent};

/// Stand-in for the real BLE/GATT link. A link only answers connectivity
/// questions and moves opaque bytes; it never inspects or buffers them.
pub trait MeshLink: Send + Sync {
    fn is_peer_connected(&self, short_peer_id: &ShortPeerId) -> bool;

    fn send_bytes(
        &self,
        to: &ShortPeerId,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Waits for the next inbound frame. Returns `None` once the link is
    /// permanently gone (the reader task exits on `None`).
    fn recv_bytes(&self) -> impl std::future::Future<Output = Option<(ShortPeerId, Vec<u8>)>> + Send;
}

/// Stand-in for the real Noise handshake's completion state. The core
/// never touches key material — it only asks whether a peer is ready.
pub trait SecureSession: Send + Sync {
    fn is_established(&self, short_peer_id: &ShortPeerId) -> bool;
}

/// Always reports every peer as having a ready secure session.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysEstablished;

impl SecureSession for AlwaysEstablished {
    fn is_established(&self, _short_peer_id: &ShortPeerId) -> bool {
        true
    }
}

/// Always reports no peer as having a ready secure session.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverEstablished;

impl SecureSession for NeverEstablished {
    fn is_established(&self, _short_peer_id: &ShortPeerId) -> bool {
        false
    }
}

/// A controllable session gate for tests: a peer starts un-established
/// and becomes established once [`Self::complete_handshake`] is called,
/// mirroring how a real handshake finishes asynchronously.
#[derive(Debug, Default)]
pub struct HandshakeGatedSession {
    established: Mutex<std::collections::HashSet<ShortPeerId>>,
}

impl HandshakeGatedSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete_handshake(&self, short_peer_id: &ShortPeerId) {
        self.established.lock().insert(short_peer_id.clone());
    }

    pub fn revoke(&self, short_peer_id: &ShortPeerId) {
        self.established.lock().remove(short_peer_id);
    }
}

impl SecureSession for HandshakeGatedSession {
    fn is_established(&self, short_peer_id: &ShortPeerId) -> bool {
        self.established.lock().contains(short_peer_id)
    }
}

impl<T: SecureSession> SecureSession for Arc<T> {
    fn is_established(&self, short_peer_id: &ShortPeerId) -> bool {
        (**self).is_established(short_peer_id)
    }
}

/// Internal framing for what travels over [`MeshLink::send_bytes`]. Opaque
/// to everything outside this module — the real link carries Noise
/// ciphertext instead, but the core has nothing to encrypt it with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum MeshFrame {
    Message { message_id: MessageId, content: String, is_group: bool },
    Ack(DeliveryAck),
    Receipt(ReadReceipt),
    Favorite { on: bool },
}

/// An in-memory [`MeshLink`] test double: a paired mpsc channel between
/// two `ShortPeerId`s, with connectivity toggled explicitly rather than
/// inferred from channel state (so tests can simulate a link dropping
/// without dropping the channel).
pub struct InProcessMeshLink {
    peer: ShortPeerId,
    tx: mpsc::Sender<(ShortPeerId, Vec<u8>)>,
    rx: tokio::sync::Mutex<mpsc::Receiver<(ShortPeerId, Vec<u8>)>>,
    connected: Arc<Mutex<HashMap<ShortPeerId, bool>>>,
}

impl InProcessMeshLink {
    /// Creates a connected pair: `a` addresses `b` as `peer`, `b` addresses
    /// `a` as `peer`, and both report each other connected until
    /// [`Self::set_connected`] says otherwise.
    #[must_use]
    pub fn create_pair(a: ShortPeerId, b: ShortPeerId) -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(64);
        let (tx_b, rx_a) = mpsc::channel(64);

        let connected_a = Arc::new(Mutex::new(HashMap::from([(b.clone(), true)])));
        let connected_b = Arc::new(Mutex::new(HashMap::from([(a.clone(), true)])));

        let link_a = Self {
            peer: b.clone(),
            tx: tx_a,
            rx: tokio::sync::Mutex::new(rx_a),
            connected: connected_a,
        };
        let link_b = Self {
            peer: a,
            tx: tx_b,
            rx: tokio::sync::Mutex::new(rx_b),
            connected: connected_b,
        };
        (link_a, link_b)
    }

    pub fn set_connected(&self, short_peer_id: &ShortPeerId, connected: bool) {
        self.connected.lock().insert(short_peer_id.clone(), connected);
    }

    #[must_use]
    pub fn peer(&self) -> &ShortPeerId {
        &self.peer
    }
}

impl MeshLink for InProcessMeshLink {
    fn is_peer_connected(&self, short_peer_id: &ShortPeerId) -> bool {
        self.connected.lock().get(short_peer_id).copied().unwrap_or(false)
    }

    async fn send_bytes(&self, to: &ShortPeerId, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_peer_connected(to) {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send((to.clone(), payload))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv_bytes(&self) -> Option<(ShortPeerId, Vec<u8>)> {
        self.rx.lock().await.recv().await
    }
}

/// [`Transport`] implementation over a [`MeshLink`] and [`SecureSession`].
///
/// Owns a background task that decodes inbound [`MeshFrame`]s off the link
/// and forwards them to the core as [`TransportEvent`]s. The task exits
/// (and the transport stops producing events) once the link's `recv_bytes`
/// returns `None` or the event receiver is dropped.
pub struct MeshTransport<L: MeshLink + 'static, S: SecureSession> {
    link: Arc<L>,
    session: S,
    reader: tokio::task::JoinHandle<()>,
}

impl<L: MeshLink + 'static, S: SecureSession> MeshTransport<L, S> {
    pub fn new(link: L, session: S, events: mpsc::Sender<TransportEvent>) -> Self {
        let link = Arc::new(link);
        let reader_link = Arc::clone(&link);
        let reader = tokio::spawn(reader_loop(reader_link, events));
        Self { link, session, reader }
    }

    /// Direct access to the underlying link, e.g. for a caller that needs
    /// to drive a test double's connectivity beyond what [`MeshLink`]
    /// itself exposes.
    #[must_use]
    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    fn ready(&self, to: &ShortPeerId) -> Result<(), TransportError> {
        if !self.link.is_peer_connected(to) {
            return Err(TransportError::ConnectionClosed);
        }
        if !self.session.is_established(to) {
            return Err(TransportError::SessionNotReady);
        }
        Ok(())
    }

    async fn send_frame(&self, to: &ShortPeerId, frame: MeshFrame) -> Result<(), TransportError> {
        self.ready(to)?;
        let bytes = postcard::to_allocvec(&frame).map_err(|_| TransportError::ConnectionClosed)?;
        self.link.send_bytes(to, bytes).await
    }
}

impl<L: MeshLink + 'static, S: SecureSession> Drop for MeshTransport<L, S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn reader_loop<L: MeshLink>(link: Arc<L>, events: mpsc::Sender<TransportEvent>) {
    while let Some((from, bytes)) = link.recv_bytes().await {
        let Ok(frame) = postcard::from_bytes::<MeshFrame>(&bytes) else {
            tracing::warn!(%from, "malformed mesh frame, skipping");
            continue;
        };
        let event = match frame {
            MeshFrame::Message { message_id, content, is_group } => {
                TransportEvent::InboundMessage { sender_short: from, plaintext: content, message_id, is_group }
            }
            MeshFrame::Ack(ack) => TransportEvent::InboundAck { ack },
            MeshFrame::Receipt(receipt) => TransportEvent::InboundReceipt { receipt },
            MeshFrame::Favorite { on } => {
                TransportEvent::FavoriteStatusChanged { sender_short: from, on, peer_relay_key: None }
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
    tracing::debug!("mesh reader task exiting");
}

impl<L: MeshLink + 'static, S: SecureSession> Transport for MeshTransport<L, S> {
    fn is_peer_connected(&self, short_peer_id: &ShortPeerId) -> bool {
        self.link.is_peer_connected(short_peer_id) && self.session.is_established(short_peer_id)
    }

    fn is_peer_reachable(&self, short_peer_id: &ShortPeerId) -> bool {
        self.is_peer_connected(short_peer_id)
    }

    async fn send_private(
        &self,
        message_id: MessageId,
        content: &str,
        to: &ShortPeerId,
        _nickname: &str,
    ) -> Result<(), TransportError> {
        self.send_frame(
            to,
            MeshFrame::Message { message_id, content: content.to_string(), is_group: false },
        )
        .await
    }

    async fn send_delivery_ack(&self, ack: DeliveryAck, to: &ShortPeerId) -> Result<(), TransportError> {
        self.send_frame(to, MeshFrame::Ack(ack)).await
    }

    async fn send_read_receipt(&self, receipt: ReadReceipt, to: &ShortPeerId) -> Result<(), TransportError> {
        self.send_frame(to, MeshFrame::Receipt(receipt)).await
    }

    async fn send_favorite_notification(&self, to: &ShortPeerId, on: bool) -> Result<(), TransportError> {
        self.send_frame(to, MeshFrame::Favorite { on }).await
    }

    async fn trigger_handshake(&self, to: &ShortPeerId) -> Result<(), TransportError> {
        if !self.link.is_peer_connected(to) {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Mesh
    }
}
