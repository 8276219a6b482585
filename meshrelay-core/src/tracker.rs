//! Delivery Tracker: a state machine per outgoing message, independent of
//! which transport eventually carries it.
//!
//! Direct messages finish at the first ack; group messages accumulate acks
//! until a majority threshold, then finish the same way. Duplicate acks,
//! receipts, and inbound messages are suppressed before any state change —
//! see [`DeliveryTracker::on_ack`].

use std::collections::{HashMap, HashSet, VecDeque};

use meshrelay_proto::ack::{AckId, DeliveryAck, ReadReceipt};
use meshrelay_proto::identity::{Fingerprint, Timestamp};
use meshrelay_proto::message::MessageId;
use tokio::sync::Mutex;

/// Direct-message delivery timeout.
pub const TIMEOUT_DIRECT_MS: u64 = 30_000;
/// Group-message delivery timeout.
pub const TIMEOUT_GROUP_MS: u64 = 60_000;
/// Favorite direct-message delivery timeout (overrides the direct timeout).
pub const TIMEOUT_FAVORITE_MS: u64 = 300_000;
/// Maximum retries for a timed-out favorite direct message.
pub const MAX_RETRIES: u32 = 3;
/// Cap on the ack/receipt and sent-ack suppression sets.
pub const SUPPRESSION_CAP: usize = 1_000;
/// Records older than this are garbage-collected regardless of state.
pub const RECORD_TTL_MS: u64 = 60 * 60 * 1_000;

/// Why a delivery ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No acknowledgment arrived from the single intended recipient.
    NoResponseFromPeer,
    /// No acknowledgment arrived from enough group members.
    NoResponseFromGroup,
}

impl FailureReason {
    /// A user-displayable description of the failure.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoResponseFromPeer => "no response from peer",
            Self::NoResponseFromGroup => "no response from group members",
        }
    }
}

/// The delivery state of a single outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Recorded, not yet submitted to a transport.
    Sending,
    /// Submitted to a transport at least once.
    Sent,
    /// Some but not enough group members have acked.
    PartiallyDelivered { acked: usize, expected: usize },
    /// Enough recipients (or the sole recipient) acked.
    Delivered { by: String, at: Timestamp },
    /// The recipient read the message.
    Read { by: String, at: Timestamp },
    /// No further progress will be made; terminal except for GC.
    Failed { reason: FailureReason },
}

/// A durable per-message delivery record.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    message_id: MessageId,
    recipient_fingerprint: Fingerprint,
    created_at: Timestamp,
    retries: u32,
    is_favorite: bool,
    is_group: bool,
    expected_recipients: usize,
    acked_by: HashSet<String>,
    state: DeliveryState,
    deadline: Option<Timestamp>,
}

impl DeliveryRecord {
    /// The message this record tracks.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// The current delivery state.
    #[must_use]
    pub const fn state(&self) -> &DeliveryState {
        &self.state
    }

    /// Stable identity of the intended recipient (or one of the group).
    #[must_use]
    pub const fn recipient_fingerprint(&self) -> &Fingerprint {
        &self.recipient_fingerprint
    }
}

fn timeout_for(is_group: bool, is_favorite: bool) -> u64 {
    if is_group {
        TIMEOUT_GROUP_MS
    } else if is_favorite {
        TIMEOUT_FAVORITE_MS
    } else {
        TIMEOUT_DIRECT_MS
    }
}

/// A bounded FIFO id set: tracks membership with O(1) lookup, evicting the
/// oldest entry once [`SUPPRESSION_CAP`] is exceeded.
#[derive(Debug, Default)]
struct BoundedIdSet<T> {
    order: VecDeque<T>,
    set: HashSet<T>,
}

impl<T: std::hash::Hash + Eq + Clone> BoundedIdSet<T> {
    fn contains(&self, id: &T) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: T) {
        if self.set.insert(id.clone()) {
            self.order.push_back(id);
            if self.order.len() > SUPPRESSION_CAP {
                if let Some(oldest) = self.order.pop_front() {
                    self.set.remove(&oldest);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.set.len()
    }
}

/// Outcome of a single [`DeliveryTracker::check_timeouts`] pass for one
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// Rescheduled for another attempt; the host may want to re-submit the
    /// message to the transport (the tracker itself never re-sends).
    Retry { message_id: MessageId, delay_ms: u64 },
    /// No further retries; the delivery is terminally failed.
    Failed { message_id: MessageId, reason: FailureReason },
}

struct State {
    records: HashMap<MessageId, DeliveryRecord>,
    received_ack_ids: BoundedIdSet<AckId>,
    sent_ack_ids: BoundedIdSet<MessageId>,
}

/// Tracks outgoing messages from submission through to delivery, read, or
/// failure, independent of which transport ultimately carries them.
pub struct DeliveryTracker {
    state: Mutex<State>,
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                records: HashMap::new(),
                received_ack_ids: BoundedIdSet::default(),
                sent_ack_ids: BoundedIdSet::default(),
            }),
        }
    }

    /// Begins tracking an outgoing message: inserts a record in
    /// [`DeliveryState::Sending`], schedules its timeout, and immediately
    /// advances to [`DeliveryState::Sent`] (the caller is about to submit
    /// it to a transport).
    pub async fn track(
        &self,
        message_id: MessageId,
        recipient_fingerprint: Fingerprint,
        expected_recipients: usize,
        is_favorite: bool,
        now: Timestamp,
    ) {
        let is_group = expected_recipients > 1;
        let deadline = Timestamp::from_millis(now.as_millis() + timeout_for(is_group, is_favorite));
        let record = DeliveryRecord {
            message_id,
            recipient_fingerprint,
            created_at: now,
            retries: 0,
            is_favorite,
            is_group,
            expected_recipients: expected_recipients.max(1),
            acked_by: HashSet::new(),
            state: DeliveryState::Sent,
            deadline: Some(deadline),
        };
        self.state.lock().await.records.insert(message_id, record);
    }

    /// Looks up the current record for a message, if still tracked.
    pub async fn get(&self, message_id: MessageId) -> Option<DeliveryRecord> {
        self.state.lock().await.records.get(&message_id).cloned()
    }

    /// Consumes an inbound [`DeliveryAck`]. Returns the resulting state if
    /// it changed anything; `None` for a duplicate ack or an untracked/
    /// already-finalized message.
    pub async fn on_ack(&self, ack: &DeliveryAck, now: Timestamp) -> Option<DeliveryState> {
        let mut state = self.state.lock().await;
        if state.received_ack_ids.contains(&ack.ack_id) {
            return None;
        }
        state.received_ack_ids.insert(ack.ack_id);

        let record = state.records.get_mut(&ack.original_message_id)?;
        record.acked_by.insert(ack.recipient_id.to_string());
        Some(Self::advance_on_ack(record, &ack.recipient_nickname, now))
    }

    /// Same transition as [`Self::on_ack`], for the relay's lean
    /// `DELIVERED:<message_id>` confirmation, which carries no ack id of
    /// its own to dedupe on — idempotent because re-inserting the same
    /// recipient into `acked_by` is a no-op.
    pub async fn on_delivery_confirmed(
        &self,
        message_id: MessageId,
        from_fingerprint: &Fingerprint,
        from_nickname: &str,
        now: Timestamp,
    ) -> Option<DeliveryState> {
        let mut state = self.state.lock().await;
        let record = state.records.get_mut(&message_id)?;
        record.acked_by.insert(from_fingerprint.to_string());
        Some(Self::advance_on_ack(record, from_nickname, now))
    }

    fn advance_on_ack(record: &mut DeliveryRecord, nickname: &str, now: Timestamp) -> DeliveryState {
        if record.is_group {
            let acked = record.acked_by.len();
            let expected = record.expected_recipients;
            let threshold = ((expected + 1) / 2).max(1);
            record.state = if acked >= threshold {
                record.deadline = None;
                DeliveryState::Delivered {
                    by: format!("{acked} members"),
                    at: now,
                }
            } else {
                DeliveryState::PartiallyDelivered { acked, expected }
            };
        } else {
            record.deadline = None;
            record.state = DeliveryState::Delivered {
                by: nickname.to_string(),
                at: now,
            };
        }
        record.state.clone()
    }

    /// Consumes an inbound [`ReadReceipt`], transitioning the record to
    /// [`DeliveryState::Read`]. Duplicate receipt ids are dropped the same
    /// way duplicate ack ids are.
    pub async fn on_read(&self, receipt: &ReadReceipt) -> Option<DeliveryState> {
        let mut state = self.state.lock().await;
        if state.received_ack_ids.contains(&receipt.receipt_id) {
            return None;
        }
        state.received_ack_ids.insert(receipt.receipt_id);

        let record = state.records.get_mut(&receipt.original_message_id)?;
        record.deadline = None;
        record.state = DeliveryState::Read {
            by: receipt.reader_nickname.clone(),
            at: receipt.timestamp,
        };
        Some(record.state.clone())
    }

    /// Scans for records whose deadline has passed, rescheduling favorite
    /// direct messages under the retry budget and failing everything else.
    pub async fn check_timeouts(&self, now: Timestamp) -> Vec<TimeoutOutcome> {
        let mut state = self.state.lock().await;
        let mut outcomes = Vec::new();
        for record in state.records.values_mut() {
            let Some(deadline) = record.deadline else { continue };
            if now < deadline {
                continue;
            }
            if record.is_favorite && !record.is_group && record.retries < MAX_RETRIES {
                let delay_ms = 5_000 * 2u64.pow(record.retries);
                record.retries += 1;
                record.deadline = Some(Timestamp::from_millis(now.as_millis() + delay_ms));
                outcomes.push(TimeoutOutcome::Retry {
                    message_id: record.message_id,
                    delay_ms,
                });
            } else {
                let reason = if record.is_group {
                    FailureReason::NoResponseFromGroup
                } else {
                    FailureReason::NoResponseFromPeer
                };
                record.deadline = None;
                record.state = DeliveryState::Failed { reason };
                outcomes.push(TimeoutOutcome::Failed {
                    message_id: record.message_id,
                    reason,
                });
            }
        }
        outcomes
    }

    /// Produces a fresh [`DeliveryAck`] for an inbound message addressed to
    /// us, unless we have already generated one for this `message_id`.
    pub async fn generate_ack(
        &self,
        message_id: MessageId,
        self_fingerprint: Fingerprint,
        self_nickname: impl Into<String>,
        hops: u32,
    ) -> Option<DeliveryAck> {
        let mut state = self.state.lock().await;
        if state.sent_ack_ids.contains(&message_id) {
            return None;
        }
        state.sent_ack_ids.insert(message_id);
        Some(DeliveryAck {
            ack_id: AckId::new(),
            original_message_id: message_id,
            recipient_id: self_fingerprint,
            recipient_nickname: self_nickname.into(),
            hops,
        })
    }

    /// Drops records older than [`RECORD_TTL_MS`] regardless of state.
    /// Returns the number of records collected.
    pub async fn gc(&self, now: Timestamp) -> usize {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, record| now.elapsed_since(record.created_at) < RECORD_TTL_MS);
        before - state.records.len()
    }

    /// Number of records currently tracked (any state).
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Size of the received-ack suppression set, for tests/diagnostics.
    pub async fn received_ack_count(&self) -> usize {
        self.state.lock().await.received_ack_ids.len()
    }
}
