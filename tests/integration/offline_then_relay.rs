//! Two peers with no mesh link at all, reachable only through the relay
//! transport: a send should still arrive and be confirmed once both sides
//! have learned each other's relay public key via a favorites exchange.

use std::time::Duration;

use meshrelay_core::config::CoreConfig;
use meshrelay_core::core::{Core, LocalIdentity};
use meshrelay_core::peer::TransportKind;
use meshrelay_core::tracker::DeliveryState;
use meshrelay_core::transport::mesh::{AlwaysEstablished, InProcessMeshLink, MeshTransport};
use meshrelay_core::transport::relay::{InProcessRelayBus, InProcessRelayLink, RelayTransport};
use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, RelayPublicKey, ShortPeerId, Timestamp};

type TestMesh = MeshTransport<InProcessMeshLink, AlwaysEstablished>;
type TestRelay = RelayTransport<InProcessRelayLink>;
type TestCore = Core<TestMesh, TestRelay>;

async fn wait_for(core: &mut TestCore, timeout: Duration) {
    tokio::time::timeout(timeout, core.step()).await.expect("timed out waiting for event");
}

#[tokio::test]
async fn message_reaches_offline_peer_via_relay_and_confirms() {
    let alice_key = NoisePublicKey::new([11u8; 32]);
    let bob_key = NoisePublicKey::new([12u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);
    let alice_short = ShortPeerId::new("alicealicealice1");
    let bob_short = ShortPeerId::new("bobbobbobbobbob1");

    let bus = InProcessRelayBus::new();
    let alice_relay_link = bus.join(alice_short.clone());
    let bob_relay_link = bus.join(bob_short.clone());

    let (tx_a, rx_a) = tokio::sync::mpsc::channel(16);
    let (tx_b, rx_b) = tokio::sync::mpsc::channel(16);
    let relay_a = RelayTransport::new(alice_relay_link, tx_a);
    let relay_b = RelayTransport::new(bob_relay_link, tx_b);

    // Both sides already exchanged FAVORITED: frames at some point and
    // learned each other's relay identity.
    relay_a.set_relay_key(bob_short.clone(), RelayPublicKey::new("npub1bobrelaykey"));
    relay_b.set_relay_key(alice_short.clone(), RelayPublicKey::new("npub1alicerelaykey"));

    let mut alice = Core::new(
        LocalIdentity { fingerprint: alice_fp.clone(), nickname: "alice".into() },
        None::<TestMesh>,
        Some(relay_a),
        CoreConfig::default(),
        rx_a,
    );
    let mut bob = Core::new(
        LocalIdentity { fingerprint: bob_fp.clone(), nickname: "bob".into() },
        None::<TestMesh>,
        Some(relay_b),
        CoreConfig::default(),
        rx_b,
    );

    alice.observe_peer(bob_short.clone(), &bob_key, "bob", TransportKind::Relay).await;
    bob.observe_peer(alice_short.clone(), &alice_key, "alice", TransportKind::Relay).await;

    let message_id = alice.router().send_private(bob_fp.clone(), "bob", "hi via relay", Timestamp::now()).await;

    wait_for(&mut bob, Duration::from_secs(1)).await;
    let room = bob.chatstore().get(&alice_fp).await.expect("bob should have a room for alice");
    assert_eq!(room.history().back().unwrap().content, "hi via relay");

    // The relay wire only carries a lean DELIVERED: confirmation, not a
    // full DeliveryAck.
    wait_for(&mut alice, Duration::from_secs(1)).await;

    let record = alice.tracker().get(message_id).await.expect("alice should still be tracking the message");
    assert!(matches!(record.state(), DeliveryState::Delivered { .. }));
    assert!(alice.outbox().is_empty(&bob_fp).await);
}
