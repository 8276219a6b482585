//! A message addressed to a group of recipients is "delivered" once a
//! majority (not all) of the expected recipients have acknowledged it.

use meshrelay_proto::ack::{AckId, DeliveryAck};
use meshrelay_proto::identity::{Fingerprint, Timestamp};
use meshrelay_proto::message::MessageId;

use meshrelay_core::tracker::{DeliveryState, DeliveryTracker};

fn fp(byte: u8) -> Fingerprint {
    Fingerprint::from_hex(format!("{byte:02x}").repeat(32))
}

fn ack_from(message_id: MessageId, recipient: Fingerprint) -> DeliveryAck {
    DeliveryAck {
        ack_id: AckId::new(),
        original_message_id: message_id,
        recipient_id: recipient,
        recipient_nickname: "member".into(),
        hops: 2,
    }
}

#[tokio::test]
async fn four_member_group_delivers_at_majority_threshold() {
    let tracker = DeliveryTracker::new();
    let message_id = MessageId::new();
    // 4 expected recipients -> threshold = max(1, 4/2) = 2.
    tracker.track(message_id, fp(1), 4, false, Timestamp::from_millis(0)).await;

    let first = tracker.on_ack(&ack_from(message_id, fp(10)), Timestamp::from_millis(100)).await.unwrap();
    assert_eq!(first, DeliveryState::PartiallyDelivered { acked: 1, expected: 4 });

    let second = tracker.on_ack(&ack_from(message_id, fp(11)), Timestamp::from_millis(150)).await.unwrap();
    assert_eq!(second, DeliveryState::Delivered { by: "2 members".into(), at: Timestamp::from_millis(150) });

    // A third member's ack arriving after the threshold was already hit is
    // harmless: the record stays Delivered.
    let third = tracker.on_ack(&ack_from(message_id, fp(12)), Timestamp::from_millis(200)).await.unwrap();
    assert!(matches!(third, DeliveryState::Delivered { .. }));
}

#[tokio::test]
async fn five_member_group_requires_ceil_majority_not_floor() {
    let tracker = DeliveryTracker::new();
    let message_id = MessageId::new();
    // 5 expected recipients -> threshold = ceil(5/2) = 3, not floor(5/2) = 2.
    tracker.track(message_id, fp(5), 5, false, Timestamp::from_millis(0)).await;

    let first = tracker.on_ack(&ack_from(message_id, fp(50)), Timestamp::from_millis(100)).await.unwrap();
    assert_eq!(first, DeliveryState::PartiallyDelivered { acked: 1, expected: 5 });

    let second = tracker.on_ack(&ack_from(message_id, fp(51)), Timestamp::from_millis(150)).await.unwrap();
    assert_eq!(second, DeliveryState::PartiallyDelivered { acked: 2, expected: 5 });

    let third = tracker.on_ack(&ack_from(message_id, fp(52)), Timestamp::from_millis(200)).await.unwrap();
    assert_eq!(third, DeliveryState::Delivered { by: "3 members".into(), at: Timestamp::from_millis(200) });
}

#[tokio::test]
async fn single_member_group_never_below_threshold_of_one() {
    let tracker = DeliveryTracker::new();
    let message_id = MessageId::new();
    // expected_recipients.max(1) means a "group" of 1 behaves like a
    // direct message: threshold = max(1, 1/2) = 1.
    tracker.track(message_id, fp(2), 1, false, Timestamp::from_millis(0)).await;

    let state = tracker.on_ack(&ack_from(message_id, fp(20)), Timestamp::from_millis(50)).await.unwrap();
    assert!(matches!(state, DeliveryState::Delivered { .. }));
}

#[tokio::test]
async fn timeout_before_threshold_fails_as_group_not_peer() {
    let tracker = DeliveryTracker::new();
    let message_id = MessageId::new();
    tracker.track(message_id, fp(3), 6, false, Timestamp::from_millis(0)).await;
    tracker.on_ack(&ack_from(message_id, fp(30)), Timestamp::from_millis(10)).await;

    let outcomes = tracker.check_timeouts(Timestamp::from_millis(meshrelay_core::tracker::TIMEOUT_GROUP_MS)).await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0],
        meshrelay_core::tracker::TimeoutOutcome::Failed { reason: meshrelay_core::tracker::FailureReason::NoResponseFromGroup, .. }
    ));
}
