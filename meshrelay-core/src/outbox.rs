//! Outbox: a per-peer durable FIFO of outgoing messages.
//!
//! The outbox is the only place message state is buffered — transports are
//! required to stay stateless (see [`crate::transport::Transport`]). A
//! message leaves the outbox only via [`Outbox::confirm_delivery`] or TTL
//! expiry; a failed or skipped send attempt never removes it.

use std::collections::{HashMap, VecDeque};

use meshrelay_proto::identity::{Fingerprint, Timestamp};
use meshrelay_proto::message::{MessageContent, MessageId, OutgoingMessage, ValidationError};
use tokio::sync::Mutex;

/// How long a message may sit unsent before a flush pass retries it.
pub const RESEND_COOLDOWN_MS: u64 = 30_000;
/// How long a message may remain queued before it is expired and dropped.
pub const TTL_MS: u64 = 24 * 60 * 60 * 1_000;
/// Maximum number of live messages kept per recipient.
pub const CAPACITY_PER_PEER: usize = 100;

struct State {
    queues: HashMap<Fingerprint, VecDeque<OutgoingMessage>>,
    index: HashMap<MessageId, Fingerprint>,
}

/// A message evicted from a full per-peer queue, for the caller to log or
/// surface as a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    /// The fingerprint whose queue overflowed.
    pub fingerprint: Fingerprint,
    /// The message that was dropped to make room.
    pub message_id: MessageId,
}

/// Per-peer ordered durable queue of pending outgoing messages.
///
/// Never surfaces an error for a missing or unreachable transport — callers
/// decide whether and how to attempt a send; the outbox only tracks
/// presence, order, and send/expiry timestamps.
pub struct Outbox {
    state: Mutex<State>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    /// Creates an empty outbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queues: HashMap::new(),
                index: HashMap::new(),
            }),
        }
    }

    /// Appends a message to its recipient's queue, evicting the oldest
    /// entry if the queue is already at [`CAPACITY_PER_PEER`].
    ///
    /// Returns the evicted message's id, if an eviction occurred.
    pub async fn enqueue(&self, message: OutgoingMessage) -> Option<Evicted> {
        let fingerprint = message.recipient_fingerprint.clone();
        let message_id = message.message_id;
        let mut state = self.state.lock().await;
        let queue = state.queues.entry(fingerprint.clone()).or_default();

        let evicted = if queue.len() >= CAPACITY_PER_PEER {
            queue.pop_front().map(|old| Evicted {
                fingerprint: fingerprint.clone(),
                message_id: old.message_id,
            })
        } else {
            None
        };
        queue.push_back(message);

        if let Some(ev) = &evicted {
            state.index.remove(&ev.message_id);
        }
        state.index.insert(message_id, fingerprint);
        evicted
    }

    /// Returns, in queue order, every message for `fingerprint` whose
    /// `sent_at` is unset or older than [`RESEND_COOLDOWN_MS`].
    pub async fn due_for_resend(&self, fingerprint: &Fingerprint, now: Timestamp) -> Vec<OutgoingMessage> {
        let state = self.state.lock().await;
        state
            .queues
            .get(fingerprint)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|m| m.is_due_for_resend(now, RESEND_COOLDOWN_MS))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records that a send attempt was made for `message_id`, regardless of
    /// whether the transport call ultimately succeeded — sends are
    /// fire-and-forget; the message stays queued either way.
    pub async fn mark_sent(&self, message_id: MessageId, now: Timestamp) {
        let mut state = self.state.lock().await;
        if let Some(fingerprint) = state.index.get(&message_id).cloned()
            && let Some(queue) = state.queues.get_mut(&fingerprint)
            && let Some(msg) = queue.iter_mut().find(|m| m.message_id == message_id)
        {
            msg.sent_at = Some(now);
        }
    }

    /// Removes a message following a confirmed delivery ack. Returns the
    /// removed message, if it was still present (a duplicate ack or a
    /// message that already expired yields `None`).
    pub async fn confirm_delivery(&self, message_id: MessageId) -> Option<OutgoingMessage> {
        let mut state = self.state.lock().await;
        let fingerprint = state.index.remove(&message_id)?;
        let queue = state.queues.get_mut(&fingerprint)?;
        let pos = queue.iter().position(|m| m.message_id == message_id)?;
        queue.remove(pos)
    }

    /// Clears every `sent_at` timestamp for a peer's queue, so the next
    /// flush re-sends everything from the start — used when a peer
    /// reconnects so in-flight messages are replayed in order.
    pub async fn reset_send_state(&self, fingerprint: &Fingerprint) {
        let mut state = self.state.lock().await;
        if let Some(queue) = state.queues.get_mut(fingerprint) {
            for msg in queue.iter_mut() {
                msg.sent_at = None;
            }
        }
    }

    /// Drops every message older than [`TTL_MS`] across all queues.
    /// Returns the ids of everything expired, for logging.
    pub async fn cleanup_expired(&self, now: Timestamp) -> Vec<MessageId> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for queue in state.queues.values_mut() {
            let mut i = 0;
            while i < queue.len() {
                if queue[i].is_expired(now, TTL_MS) {
                    if let Some(msg) = queue.remove(i) {
                        expired.push(msg.message_id);
                    }
                } else {
                    i += 1;
                }
            }
        }
        for id in &expired {
            state.index.remove(id);
        }
        expired
    }

    /// Number of live messages currently queued for `fingerprint`.
    pub async fn len(&self, fingerprint: &Fingerprint) -> usize {
        self.state.lock().await.queues.get(fingerprint).map_or(0, VecDeque::len)
    }

    /// True if `fingerprint` has no live queued messages.
    pub async fn is_empty(&self, fingerprint: &Fingerprint) -> bool {
        self.len(fingerprint).await == 0
    }

    /// Every fingerprint with at least one live queued message, for a
    /// `flush_all` sweep.
    pub async fn peers_with_pending(&self) -> Vec<Fingerprint> {
        self.state
            .lock()
            .await
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(fp, _)| fp.clone())
            .collect()
    }

    /// Validates and appends a new text message for `fingerprint`, building
    /// the [`OutgoingMessage`] and returning its freshly assigned id.
    ///
    /// The id is minted and returned even on validation failure, so callers
    /// can report it alongside the rejection without special-casing the
    /// error path; the message itself is never enqueued in that case.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the content is empty or exceeds
    /// [`meshrelay_proto::message::MAX_MESSAGE_SIZE`].
    pub async fn enqueue_text(
        &self,
        fingerprint: Fingerprint,
        content: impl Into<String>,
        nickname: impl Into<String>,
    ) -> (MessageId, Result<Option<Evicted>, ValidationError>) {
        let message = OutgoingMessage::new(fingerprint, MessageContent::Text(content.into()), nickname);
        let id = message.message_id;
        if let Err(e) = message.validate() {
            return (id, Err(e));
        }
        (id, Ok(self.enqueue(message).await))
    }
}
