//! Delivery acknowledgment and read receipt wire types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::{Fingerprint, Timestamp};
use crate::message::MessageId;

/// Identifier for a single ack or receipt, distinct from the
/// [`MessageId`] it refers back to — needed so a producer can tell
/// whether it has already emitted this exact acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckId(Uuid);

impl AckId {
    /// Creates a new unique ack/receipt identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AckId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Confirmation that a specific message reached its recipient.
///
/// Produced at most once per `(recipient, original_message_id)` by the
/// delivery tracker; the `original_message_id` is carried unchanged so the
/// sender's tracker can match it without knowing which transport carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAck {
    /// Unique id of this ack itself, used for duplicate suppression.
    pub ack_id: AckId,
    /// The message this ack confirms delivery of.
    pub original_message_id: MessageId,
    /// Stable identity of the peer that produced this ack.
    pub recipient_id: Fingerprint,
    /// Display nickname of the acknowledging peer at ack time.
    pub recipient_nickname: String,
    /// Number of relay/mesh hops the ack traversed, if known.
    pub hops: u32,
}

/// Confirmation that a specific message was viewed by its recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// Unique id of this receipt itself.
    pub receipt_id: AckId,
    /// The message this receipt confirms was read.
    pub original_message_id: MessageId,
    /// Stable identity of the peer that read the message.
    pub reader_id: Fingerprint,
    /// Display nickname of the reading peer at receipt time.
    pub reader_nickname: String,
    /// When the message was read.
    pub timestamp: Timestamp,
}
