//! Transport abstraction: a uniform send/receive surface over the mesh
//! and relay transports.
//!
//! Transports never retain message state — all buffering lives in the
//! [`crate::outbox::Outbox`]. A transport's only job is connectivity and
//! reachability signals plus best-effort, fire-and-forget delivery attempts.

pub mod mesh;
pub mod relay;

use meshrelay_proto::ack::{DeliveryAck, ReadReceipt};
use meshrelay_proto::identity::{Fingerprint, RelayPublicKey, ShortPeerId};
use meshrelay_proto::message::MessageId;

use crate::peer::TransportKind;

/// Errors a transport can report from a send attempt.
///
/// None of these are fatal to the caller — the router converts every one
/// of them into "not sent yet" and leaves the message in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The link to the peer is not currently open.
    #[error("connection closed")]
    ConnectionClosed,
    /// No secure session is established yet (mesh: Noise handshake
    /// pending).
    #[error("no secure session established — handshake required")]
    SessionNotReady,
    /// The relay's SOCKS proxy is not reachable right now.
    #[error("relay SOCKS proxy unavailable")]
    SocksUnavailable,
    /// The peer is not reachable via this transport at all.
    #[error("peer {0} is unreachable on this transport")]
    Unreachable(ShortPeerId),
}

/// Asynchronous events a transport publishes. The router subscribes to
/// these; transports never call back into core state directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer's link came up.
    PeerConnected { short_peer_id: ShortPeerId, transport: TransportKind },
    /// A peer's link went down.
    PeerDisconnected { short_peer_id: ShortPeerId, transport: TransportKind },
    /// A secure session finished negotiating with a peer.
    HandshakeCompleted { short_peer_id: ShortPeerId, fingerprint: Fingerprint },
    /// A decrypted inbound message arrived.
    InboundMessage {
        sender_short: ShortPeerId,
        plaintext: String,
        message_id: MessageId,
        is_group: bool,
    },
    /// An inbound delivery acknowledgment arrived (mesh shape — carries
    /// hop count and the acknowledging peer's fingerprint/nickname).
    InboundAck { ack: DeliveryAck },
    /// A lean delivery confirmation arrived over the relay wire, which
    /// only ever carries the confirmed message id and the confirming
    /// peer's short id, not a full [`DeliveryAck`].
    InboundDeliveryConfirmed { message_id: MessageId, from: ShortPeerId },
    /// An inbound read receipt arrived.
    InboundReceipt { receipt: ReadReceipt },
    /// A peer toggled their favorite status towards us, optionally
    /// revealing their relay public key.
    FavoriteStatusChanged {
        sender_short: ShortPeerId,
        on: bool,
        peer_relay_key: Option<RelayPublicKey>,
    },
}

/// One of the two transports a message can travel over.
///
/// Implementations MUST NOT buffer or retry messages themselves — every
/// `send_*` call is a single best-effort attempt that returns immediately;
/// retry and buffering are the outbox's job.
pub trait Transport: Send + Sync {
    /// True if an active link to `short_peer_id` exists right now
    /// (connectivity-driven transports such as mesh).
    fn is_peer_connected(&self, short_peer_id: &ShortPeerId) -> bool;

    /// True if a send could plausibly be attempted, even without an open
    /// link (reachability-driven transports such as relay, where having a
    /// known relay key is enough).
    fn is_peer_reachable(&self, short_peer_id: &ShortPeerId) -> bool;

    /// Attempts to send a private message. Returns immediately; does not
    /// await delivery confirmation.
    fn send_private(
        &self,
        message_id: MessageId,
        content: &str,
        to: &ShortPeerId,
        nickname: &str,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Attempts to send a delivery acknowledgment.
    fn send_delivery_ack(
        &self,
        ack: DeliveryAck,
        to: &ShortPeerId,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Attempts to send a read receipt.
    fn send_read_receipt(
        &self,
        receipt: ReadReceipt,
        to: &ShortPeerId,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Attempts to send a favorite-status notification.
    fn send_favorite_notification(
        &self,
        to: &ShortPeerId,
        on: bool,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Initiates (or re-initiates) a secure-session handshake with a peer.
    /// Never awaits the handshake inline — completion is signaled later by
    /// a [`TransportEvent::HandshakeCompleted`].
    fn trigger_handshake(
        &self,
        to: &ShortPeerId,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// Records a peer's relay public key, as learned from a favorites
    /// exchange. A no-op for transports that have no notion of one
    /// (mesh); [`crate::transport::relay::RelayTransport`] is the only
    /// implementation that keeps this state, since its own reachability
    /// check depends on it.
    fn learn_relay_key(&self, _short_peer_id: ShortPeerId, _key: RelayPublicKey) {}
}
