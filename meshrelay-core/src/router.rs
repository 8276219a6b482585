//! Router: the decision center. Selects a transport per send attempt,
//! queues before ever attempting a send, and reacts to connectivity and
//! favorite-status changes by re-flushing.
//!
//! Generic over the two transport slots rather than dynamically dispatched
//! — at most one mesh and one relay transport exist in this system, so a
//! `Router<M, R>` holding `Option<M>`/`Option<R>` is simpler than a trait
//! object registry and keeps every send on the `async fn` fast path.

use std::collections::VecDeque;
use std::sync::Arc;

use meshrelay_proto::ack::{DeliveryAck, ReadReceipt};
use meshrelay_proto::identity::{Fingerprint, ShortPeerId, Timestamp};
use meshrelay_proto::message::MessageId;
use tokio::sync::Mutex;

use crate::config::RouterConfig;
use crate::outbox::Outbox;
use crate::peer::PeerDirectory;
use crate::tracker::DeliveryTracker;
use crate::transport::Transport;

/// Why a send, ack, or receipt was not dispatched. Never surfaced to the
/// caller as an error — routing never fails the public surface — but
/// returned from internal helpers so callers (and tests) can log or assert
/// on the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterDropReason {
    /// The recipient is blocked.
    Blocked,
    /// Neither transport reports the recipient connected or reachable.
    NoReachableTransport,
    /// The recipient is not yet known to the peer directory at all.
    UnknownPeer,
    /// The relay's outbound receipt rate limit would be exceeded.
    ThrottledOnRelay,
}

/// A one-peer-at-a-time window limiting how often a single caller may
/// push through a shared budget, used to throttle outbound relay read
/// receipts to a flat rate (~3/s) so a burst of reads doesn't flood the
/// relay.
struct RateLimiter {
    window: VecDeque<Timestamp>,
    rate_per_sec: u32,
}

impl RateLimiter {
    fn new(rate_per_sec: u32) -> Self {
        Self { window: VecDeque::new(), rate_per_sec }
    }

    /// Returns `true` and records the attempt if under budget for the
    /// second ending at `now`; otherwise returns `false` without recording.
    fn allow(&mut self, now: Timestamp) -> bool {
        while let Some(&oldest) = self.window.front() {
            if now.elapsed_since(oldest) >= 1_000 {
                self.window.pop_front();
            } else {
                break;
            }
        }
        if self.window.len() >= self.rate_per_sec as usize {
            return false;
        }
        self.window.push_back(now);
        true
    }
}

/// The decision center: owns the outbox and delivery tracker, and holds at
/// most one mesh and one relay transport.
pub struct Router<M: Transport, R: Transport> {
    peers: Arc<PeerDirectory>,
    outbox: Arc<Outbox>,
    tracker: Arc<DeliveryTracker>,
    mesh: Option<M>,
    relay: Option<R>,
    config: RouterConfig,
    relay_receipt_limiter: Mutex<RateLimiter>,
}

impl<M: Transport, R: Transport> Router<M, R> {
    /// Builds a router over explicit, already-constructed components —
    /// per the redesign away from singletons, nothing here reaches for
    /// global state.
    pub fn new(
        peers: Arc<PeerDirectory>,
        outbox: Arc<Outbox>,
        tracker: Arc<DeliveryTracker>,
        mesh: Option<M>,
        relay: Option<R>,
        config: RouterConfig,
    ) -> Self {
        let rate = config.relay_receipt_rate_per_sec;
        Self {
            peers,
            outbox,
            tracker,
            mesh,
            relay,
            config,
            relay_receipt_limiter: Mutex::new(RateLimiter::new(rate)),
        }
    }

    /// Queues a private message and immediately attempts to flush it.
    /// Always queues first — an offline send and an online send look
    /// identical from the caller's perspective.
    ///
    /// Never throws: an empty or oversized message is logged and dropped
    /// rather than queued, but the caller still gets back the id that
    /// would have been assigned, so it can correlate the rejection with
    /// whatever UI affordance triggered the send.
    pub async fn send_private(
        &self,
        recipient_fingerprint: Fingerprint,
        recipient_nickname: impl Into<String>,
        content: impl Into<String>,
        now: Timestamp,
    ) -> MessageId {
        let (message_id, result) = self
            .outbox
            .enqueue_text(recipient_fingerprint.clone(), content, recipient_nickname)
            .await;
        match result {
            Ok(Some(evicted)) => {
                tracing::warn!(fingerprint = %evicted.fingerprint, message_id = %evicted.message_id, "outbox overflow, evicted oldest message");
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%message_id, error = %e, "message rejected by validation, not queued");
                return message_id;
            }
        }
        self.flush_outbox(&recipient_fingerprint, now).await;
        message_id
    }

    /// Attempts to send every message in `fingerprint`'s queue that is due
    /// for a resend attempt, in queue order.
    pub async fn flush_outbox(&self, fingerprint: &Fingerprint, now: Timestamp) {
        if self.peers.is_blocked(fingerprint).await {
            tracing::debug!(%fingerprint, "flush skipped: recipient blocked");
            return;
        }
        let Some(record) = self.peers.resolve_by_fingerprint(fingerprint).await else {
            tracing::debug!(%fingerprint, "flush skipped: peer unknown");
            return;
        };

        for message in self.outbox.due_for_resend(fingerprint, now).await {
            let message_id = message.message_id;
            match self.attempt_send(&record.short_peer_id, message.content.as_str(), &message.recipient_nickname, message_id).await {
                Ok(via) => {
                    tracing::debug!(%fingerprint, %message_id, transport = ?via, "sent queued message");
                    self.outbox.mark_sent(message_id, now).await;
                    if self.tracker.get(message_id).await.is_none() {
                        self.tracker.track(message_id, fingerprint.clone(), 1, record.favorite, now).await;
                    }
                }
                Err(reason) => {
                    tracing::debug!(%fingerprint, %message_id, ?reason, "flush attempt did not send, left queued");
                }
            }
        }
    }

    /// Flushes every peer with at least one pending message, as the
    /// lifecycle controller's periodic safety net does.
    pub async fn flush_all(&self, now: Timestamp) {
        for fingerprint in self.outbox.peers_with_pending().await {
            self.flush_outbox(&fingerprint, now).await;
        }
    }

    /// Purges expired outbox entries, logging each one dropped.
    pub async fn cleanup_expired(&self, now: Timestamp) -> usize {
        let expired = self.outbox.cleanup_expired(now).await;
        for message_id in &expired {
            tracing::warn!(%message_id, "outbox entry expired without delivery");
        }
        expired.len()
    }

    /// Removes a message from the outbox following confirmed delivery.
    /// Called once the delivery tracker transitions a message to
    /// `Delivered`.
    pub async fn confirm_delivery(&self, message_id: MessageId) {
        self.outbox.confirm_delivery(message_id).await;
    }

    /// Clears resend cooldowns for a peer's queue so the next flush
    /// replays everything from the start, and immediately flushes. Called
    /// when the peer directory reports the peer reconnected.
    pub async fn reset_send_state_for(&self, fingerprint: &Fingerprint, now: Timestamp) {
        self.outbox.reset_send_state(fingerprint).await;
        self.flush_outbox(fingerprint, now).await;
    }

    /// Propagates a peer's relay public key, as just learned by the peer
    /// directory from a favorites exchange, down to whichever transport
    /// actually keeps per-peer relay key state. A no-op on the mesh side;
    /// on the relay side this is what makes `is_peer_reachable` start
    /// reporting true for this peer.
    pub async fn learn_relay_key(&self, short_peer_id: &ShortPeerId, key: meshrelay_proto::identity::RelayPublicKey) {
        if let Some(mesh) = &self.mesh {
            mesh.learn_relay_key(short_peer_id.clone(), key.clone());
        }
        if let Some(relay) = &self.relay {
            relay.learn_relay_key(short_peer_id.clone(), key);
        }
    }

    /// Sends a delivery ack over the first reachable transport (mesh if a
    /// session is established, else relay). Acks are never queued — a
    /// dropped ack is implicitly regenerated the next time the sender
    /// retransmits the message it refers to.
    pub async fn send_delivery_ack(&self, ack: DeliveryAck, recipient_fingerprint: &Fingerprint) -> Result<(), RouterDropReason> {
        let record = self
            .peers
            .resolve_by_fingerprint(recipient_fingerprint)
            .await
            .ok_or(RouterDropReason::UnknownPeer)?;

        if let Some(mesh) = &self.mesh
            && mesh.is_peer_connected(&record.short_peer_id)
        {
            if mesh.send_delivery_ack(ack, &record.short_peer_id).await.is_ok() {
                return Ok(());
            }
        } else if let Some(relay) = &self.relay
            && relay.is_peer_reachable(&record.short_peer_id)
            && relay.send_delivery_ack(ack, &record.short_peer_id).await.is_ok()
        {
            return Ok(());
        }
        Err(RouterDropReason::NoReachableTransport)
    }

    /// Sends a read receipt, throttled on the relay transport to avoid
    /// relay bans. Like acks, receipts are never queued.
    pub async fn send_read_receipt(&self, receipt: ReadReceipt, recipient_fingerprint: &Fingerprint, now: Timestamp) -> Result<(), RouterDropReason> {
        let record = self
            .peers
            .resolve_by_fingerprint(recipient_fingerprint)
            .await
            .ok_or(RouterDropReason::UnknownPeer)?;

        if let Some(mesh) = &self.mesh
            && mesh.is_peer_connected(&record.short_peer_id)
        {
            if mesh.send_read_receipt(receipt, &record.short_peer_id).await.is_ok() {
                return Ok(());
            }
            return Err(RouterDropReason::NoReachableTransport);
        }

        if let Some(relay) = &self.relay
            && relay.is_peer_reachable(&record.short_peer_id)
        {
            if !self.relay_receipt_limiter.lock().await.allow(now) {
                tracing::debug!(%recipient_fingerprint, "read receipt dropped: relay rate limit");
                return Err(RouterDropReason::ThrottledOnRelay);
            }
            if relay.send_read_receipt(receipt, &record.short_peer_id).await.is_ok() {
                return Ok(());
            }
        }
        Err(RouterDropReason::NoReachableTransport)
    }

    /// Sends a favorite-status notification over the first reachable
    /// transport.
    pub async fn send_favorite_notification(&self, recipient_fingerprint: &Fingerprint, on: bool) -> Result<(), RouterDropReason> {
        let record = self
            .peers
            .resolve_by_fingerprint(recipient_fingerprint)
            .await
            .ok_or(RouterDropReason::UnknownPeer)?;

        if let Some(mesh) = &self.mesh
            && mesh.is_peer_connected(&record.short_peer_id)
            && mesh.send_favorite_notification(&record.short_peer_id, on).await.is_ok()
        {
            return Ok(());
        }
        if let Some(relay) = &self.relay
            && relay.is_peer_reachable(&record.short_peer_id)
            && relay.send_favorite_notification(&record.short_peer_id, on).await.is_ok()
        {
            return Ok(());
        }
        Err(RouterDropReason::NoReachableTransport)
    }

    /// Transport selection algorithm: mesh if connected, else relay if
    /// reachable, else leave queued. Returns which kind of transport the
    /// send went out over.
    async fn attempt_send(
        &self,
        to: &ShortPeerId,
        content: &str,
        nickname: &str,
        message_id: MessageId,
    ) -> Result<crate::peer::TransportKind, RouterDropReason> {
        if let Some(mesh) = &self.mesh
            && mesh.is_peer_connected(to)
        {
            return match mesh.send_private(message_id, content, to, nickname).await {
                Ok(()) => Ok(mesh.kind()),
                Err(err) => {
                    tracing::debug!(%err, "mesh send attempt failed, leaving queued");
                    Err(RouterDropReason::NoReachableTransport)
                }
            };
        }
        if let Some(relay) = &self.relay
            && relay.is_peer_reachable(to)
        {
            return match relay.send_private(message_id, content, to, nickname).await {
                Ok(()) => Ok(relay.kind()),
                Err(err) => {
                    tracing::debug!(%err, "relay send attempt failed, leaving queued");
                    Err(RouterDropReason::NoReachableTransport)
                }
            };
        }
        Err(RouterDropReason::NoReachableTransport)
    }

    /// Read-only access to the configured outbox/router tunables.
    #[must_use]
    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }
}
