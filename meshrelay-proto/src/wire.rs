//! The relay transport's ASCII-tagged wire format.
//!
//! Kept bit-exact for interoperability with the other peers on a relay:
//! `MSG:<message_id>:<content>`, `DELIVERED:<message_id>`,
//! `READ:<base64 of postcard-encoded receipt>`,
//! `FAVORITED:<relay_public_key_bech32>` / `UNFAVORITED:<relay_public_key_bech32>`.
//! Parsing happens once, at the edge, into [`RelayFrame`]; nothing downstream
//! touches the tagged strings again.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::ack::ReadReceipt;
use crate::identity::RelayPublicKey;
use crate::message::MessageId;

const TAG_MSG: &str = "MSG:";
const TAG_DELIVERED: &str = "DELIVERED:";
const TAG_READ: &str = "READ:";
const TAG_FAVORITED: &str = "FAVORITED:";
const TAG_UNFAVORITED: &str = "UNFAVORITED:";

/// A decoded relay wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// A private text message, decoded from `MSG:<message_id>:<content>`.
    Message { message_id: MessageId, content: String },
    /// A delivery acknowledgment, decoded from `DELIVERED:<message_id>`.
    Delivered { message_id: MessageId },
    /// A read receipt, decoded from `READ:<base64 receipt>`.
    Read { receipt: ReadReceipt },
    /// A favorite toggle and self-introduction, decoded from
    /// `FAVORITED:<key>` / `UNFAVORITED:<key>`.
    Favorite { peer_relay_key: RelayPublicKey, on: bool },
}

/// Error returned when a relay payload cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The payload does not start with any recognized tag.
    #[error("unrecognized relay payload tag")]
    UnknownTag,
    /// The payload has a recognized tag but malformed contents.
    #[error("malformed relay payload: {0}")]
    Malformed(String),
}

impl RelayFrame {
    /// Formats this frame into its bit-exact wire string.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Message { message_id, content } => format!("{TAG_MSG}{message_id}:{content}"),
            Self::Delivered { message_id } => format!("{TAG_DELIVERED}{message_id}"),
            Self::Read { receipt } => {
                let bytes = postcard::to_allocvec(receipt).unwrap_or_default();
                format!("{TAG_READ}{}", BASE64.encode(bytes))
            }
            Self::Favorite { peer_relay_key, on } => {
                let tag = if *on { TAG_FAVORITED } else { TAG_UNFAVORITED };
                format!("{tag}{peer_relay_key}")
            }
        }
    }

    /// Parses a relay wire payload into a tagged frame.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownTag`] if no recognized prefix matches, or
    /// [`WireError::Malformed`] if the tag matches but the remainder is
    /// not well-formed.
    pub fn parse(payload: &str) -> Result<Self, WireError> {
        if let Some(rest) = payload.strip_prefix(TAG_MSG) {
            let (id_str, content) = rest
                .split_once(':')
                .ok_or_else(|| WireError::Malformed("MSG missing content separator".into()))?;
            let message_id: MessageId = id_str
                .parse()
                .map_err(|_| WireError::Malformed("MSG has invalid message id".into()))?;
            return Ok(Self::Message {
                message_id,
                content: content.to_string(),
            });
        }
        if let Some(rest) = payload.strip_prefix(TAG_DELIVERED) {
            let message_id: MessageId = rest
                .parse()
                .map_err(|_| WireError::Malformed("DELIVERED has invalid message id".into()))?;
            return Ok(Self::Delivered { message_id });
        }
        if let Some(rest) = payload.strip_prefix(TAG_READ) {
            let bytes = BASE64
                .decode(rest)
                .map_err(|e| WireError::Malformed(format!("READ has invalid base64: {e}")))?;
            let receipt: ReadReceipt = postcard::from_bytes(&bytes)
                .map_err(|e| WireError::Malformed(format!("READ has invalid receipt: {e}")))?;
            return Ok(Self::Read { receipt });
        }
        if let Some(rest) = payload.strip_prefix(TAG_FAVORITED) {
            let peer_relay_key = RelayPublicKey::parse_bech32(rest).map_err(|e| WireError::Malformed(e.to_string()))?;
            return Ok(Self::Favorite { peer_relay_key, on: true });
        }
        if let Some(rest) = payload.strip_prefix(TAG_UNFAVORITED) {
            let peer_relay_key = RelayPublicKey::parse_bech32(rest).map_err(|e| WireError::Malformed(e.to_string()))?;
            return Ok(Self::Favorite { peer_relay_key, on: false });
        }
        Err(WireError::UnknownTag)
    }
}
