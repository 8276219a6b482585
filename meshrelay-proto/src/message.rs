//! Message types exchanged between peers: content, metadata, and the
//! outgoing-message record the outbox keeps until delivery is confirmed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{Fingerprint, Timestamp};

/// Maximum allowed message payload size in bytes (64 KB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID, e.g. one observed
    /// over a transport.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Content of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    /// Plain text message content.
    Text(String),
}

impl MessageContent {
    fn byte_len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
        }
    }

    /// Returns the content as plain text, for handing to a transport's
    /// `send_private`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) => text,
        }
    }
}

/// Error returned when a message fails validation before being queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// A durable record of one outgoing message, owned by the outbox until an
/// ack confirms delivery or the TTL expires.
///
/// `sent_at` is `None` until the router's first send attempt and is cleared
/// again by `reset_send_state` so that a reconnecting peer's queue is
/// replayed from the start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Identifier threaded through acks and receipts back to this record.
    pub message_id: MessageId,
    /// Stable identity of the intended recipient.
    pub recipient_fingerprint: Fingerprint,
    /// Message payload.
    pub content: MessageContent,
    /// Recipient's last-known display nickname, carried for wire framing.
    pub recipient_nickname: String,
    /// When this message was appended to the outbox.
    pub created_at: Timestamp,
    /// When the most recent send attempt was made, if any.
    pub sent_at: Option<Timestamp>,
}

impl OutgoingMessage {
    /// Builds a new outgoing message with a fresh [`MessageId`] and
    /// `created_at` timestamp, `sent_at` unset.
    #[must_use]
    pub fn new(recipient_fingerprint: Fingerprint, content: MessageContent, recipient_nickname: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::new(),
            recipient_fingerprint,
            content,
            recipient_nickname: recipient_nickname.into(),
            created_at: Timestamp::now(),
            sent_at: None,
        }
    }

    /// Validates the content for sending: non-empty and within
    /// [`MAX_MESSAGE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] or [`ValidationError::TooLarge`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.content.is_empty() {
            return Err(ValidationError::Empty);
        }
        let size = self.content.byte_len();
        if size > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLarge {
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }

    /// True once `resend_cooldown` has elapsed since the last send attempt,
    /// or the message has never been sent at all.
    #[must_use]
    pub fn is_due_for_resend(&self, now: Timestamp, resend_cooldown_ms: u64) -> bool {
        match self.sent_at {
            None => true,
            Some(sent_at) => now.elapsed_since(sent_at) >= resend_cooldown_ms,
        }
    }

    /// True once the message has outlived the outbox TTL, measured from
    /// `created_at` regardless of send attempts.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp, ttl_ms: u64) -> bool {
        now.elapsed_since(self.created_at) >= ttl_ms
    }
}
