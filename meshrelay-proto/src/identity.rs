//! Peer identity types: long-lived keys, derived fingerprints, and the
//! short ephemeral handles transports use.
//!
//! `noise_public_key` is the only long-lived identity a peer has. Everything
//! else — the mesh's `short_peer_id`, the relay's `relay_public_key` — is
//! either derived from it or learned separately and must be reconcilable
//! back to it. See `fingerprint` for the stable, immutable identifier that
//! chat rooms are keyed on.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A peer's long-lived identity key (opaque to the core — the real system's
/// Noise static public key). The core never inspects the bytes beyond hashing
/// them to a [`Fingerprint`] or deriving a [`ShortPeerId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoisePublicKey([u8; 32]);

impl NoisePublicKey {
    /// Wraps a raw 32-byte public key.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// SHA-256 of a peer's [`NoisePublicKey`], hex-encoded.
///
/// Stable across restarts and across `short_peer_id` rotation — this is the
/// primary key for chat rooms: fingerprint is immutable, while
/// `short_peer_id` and `relay_public_key` may change and must always be
/// reconcilable back to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derives the fingerprint of a peer's long-lived identity key.
    #[must_use]
    pub fn of(key: &NoisePublicKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wraps an already-hex-encoded fingerprint (e.g. read back from storage).
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short, ephemeral 16-hex-character handle used by the mesh transport.
///
/// Derived deterministically from [`NoisePublicKey`]. The BLE advertisement
/// layer that actually hands these out over the air is out of scope here;
/// this crate only requires that the derivation be a pure function of the
/// identity key so a peer can be recognized again after reconnecting under
/// the same `short_peer_id`. We use the first 8 bytes of the fingerprint
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShortPeerId(String);

impl ShortPeerId {
    /// Derives the short id deterministically from a long-lived identity key.
    #[must_use]
    pub fn derive(key: &NoisePublicKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    /// Wraps an already-derived short id, e.g. one observed over the wire.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the 16-hex-character string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShortPeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer's identity on the relay transport, learned via a favorites
/// exchange and stored in its bech32 string form. Beyond the bech32
/// envelope itself, the core treats this as opaque — the relay
/// transport's own crypto layer is responsible for whatever the decoded
/// payload means.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayPublicKey(String);

/// Error returned when a string does not decode as bech32.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bech32 relay public key: {0}")]
pub struct InvalidRelayPublicKey(String);

impl RelayPublicKey {
    /// Wraps an already-validated bech32-encoded relay public key string
    /// (e.g. `npub1...`), without re-checking its envelope. Used for
    /// locally-trusted construction (tests, values already validated at
    /// the wire boundary via [`Self::parse_bech32`]).
    #[must_use]
    pub fn new(bech32_str: impl Into<String>) -> Self {
        Self(bech32_str.into())
    }

    /// Parses and validates a bech32 string, as received untrusted off
    /// the relay wire's `FAVORITED:`/`UNFAVORITED:` frames.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRelayPublicKey`] if `s` does not decode as a
    /// well-formed bech32 string (wrong checksum, invalid charset, etc).
    pub fn parse_bech32(s: &str) -> Result<Self, InvalidRelayPublicKey> {
        bech32::decode(s).map_err(|e| InvalidRelayPublicKey(e.to_string()))?;
        Ok(Self(s.to_string()))
    }

    /// Returns the bech32 string form, ready for wire transmission.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp, matching the field type used
/// throughout the delivery record and chat room data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns the duration elapsed between `self` and a later timestamp.
    #[must_use]
    pub const fn elapsed_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
