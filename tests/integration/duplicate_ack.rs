//! A delivery ack that arrives twice (e.g. the mesh link re-delivers the
//! same frame) must only advance the delivery state once.

use meshrelay_proto::ack::{AckId, DeliveryAck};
use meshrelay_proto::identity::{Fingerprint, Timestamp};
use meshrelay_proto::message::MessageId;

use meshrelay_core::tracker::DeliveryTracker;

#[tokio::test]
async fn repeated_ack_id_only_advances_state_once() {
    let tracker = DeliveryTracker::new();
    let message_id = MessageId::new();
    let recipient = Fingerprint::from_hex("ab".repeat(32));
    tracker.track(message_id, recipient.clone(), 1, false, Timestamp::from_millis(0)).await;

    let ack = DeliveryAck {
        ack_id: AckId::new(),
        original_message_id: message_id,
        recipient_id: recipient,
        recipient_nickname: "bob".into(),
        hops: 1,
    };

    let first = tracker.on_ack(&ack, Timestamp::from_millis(100)).await;
    assert!(matches!(first, Some(meshrelay_core::tracker::DeliveryState::Delivered { .. })));

    // The exact same ack (same ack_id) arrives again, as a retransmission
    // would produce.
    let second = tracker.on_ack(&ack, Timestamp::from_millis(200)).await;
    assert!(second.is_none(), "a duplicate ack id must not re-trigger a state transition");

    assert_eq!(tracker.received_ack_count().await, 1);
}

#[tokio::test]
async fn relays_lean_confirmation_is_idempotent_on_recipient_id() {
    // The relay's DELIVERED:<message_id> frame carries no ack id of its
    // own; idempotence instead falls out of inserting the same recipient
    // fingerprint into the record's acked_by set twice.
    let tracker = DeliveryTracker::new();
    let message_id = MessageId::new();
    let recipient = Fingerprint::from_hex("cd".repeat(32));
    tracker.track(message_id, recipient.clone(), 1, false, Timestamp::from_millis(0)).await;

    let first = tracker.on_delivery_confirmed(message_id, &recipient, "bob", Timestamp::from_millis(100)).await;
    assert!(matches!(first, Some(meshrelay_core::tracker::DeliveryState::Delivered { .. })));

    let second = tracker.on_delivery_confirmed(message_id, &recipient, "bob", Timestamp::from_millis(200)).await;
    assert!(matches!(second, Some(meshrelay_core::tracker::DeliveryState::Delivered { .. })), "re-confirming an already-delivered direct message is a harmless no-op transition");
}
