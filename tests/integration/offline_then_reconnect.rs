//! A message sent while the mesh link is down stays queued; once the peer
//! reconnects and completes a handshake, the outbox replays it without the
//! caller resending anything.

use std::time::Duration;

use meshrelay_core::config::CoreConfig;
use meshrelay_core::core::{Core, LocalIdentity};
use meshrelay_core::peer::TransportKind;
use meshrelay_core::transport::TransportEvent;
use meshrelay_core::transport::mesh::{AlwaysEstablished, InProcessMeshLink, MeshTransport};
use meshrelay_core::transport::relay::{InProcessRelayLink, RelayTransport};
use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, ShortPeerId, Timestamp};

type TestMesh = MeshTransport<InProcessMeshLink, AlwaysEstablished>;
type TestRelay = RelayTransport<InProcessRelayLink>;

#[tokio::test]
async fn queued_message_replays_once_peer_reconnects() {
    let alice_key = NoisePublicKey::new([21u8; 32]);
    let bob_key = NoisePublicKey::new([22u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);

    let (alice_link, bob_link) = InProcessMeshLink::create_pair(ShortPeerId::new("alice00000000021"), ShortPeerId::new("bob000000000021b"));
    let bob_as_seen_by_alice = alice_link.peer().clone();
    alice_link.set_connected(&bob_as_seen_by_alice, false);

    let (tx_a, rx_a) = tokio::sync::mpsc::channel(16);
    let (tx_b, mut rx_b) = tokio::sync::mpsc::channel(16);
    let mesh_a = MeshTransport::new(alice_link, AlwaysEstablished, tx_a);
    let _mesh_b = MeshTransport::new(bob_link, AlwaysEstablished, tx_b);
    let alice_link_handle = mesh_a.link().clone();

    let mut alice = Core::new(
        LocalIdentity { fingerprint: alice_fp, nickname: "alice".into() },
        Some(mesh_a),
        None::<TestRelay>,
        CoreConfig::default(),
        rx_a,
    );
    alice.observe_peer(bob_as_seen_by_alice.clone(), &bob_key, "bob", TransportKind::Mesh).await;

    let message_id = alice.router().send_private(bob_fp.clone(), "bob", "queued while offline", Timestamp::now()).await;
    assert_eq!(alice.outbox().len(&bob_fp).await, 1, "message should stay queued while the link is down");

    // Nothing crosses the wire while disconnected.
    let nothing = tokio::time::timeout(Duration::from_millis(100), rx_b.recv()).await;
    assert!(nothing.is_err(), "bob should not receive anything while alice's link to him is down");

    // The link comes back up and the peer directory observes a fresh
    // handshake under the same short id, which the composition root
    // reacts to by resetting and re-flushing the outbox.
    alice_link_handle.set_connected(&bob_as_seen_by_alice, true);
    alice
        .handle_event(TransportEvent::HandshakeCompleted { short_peer_id: bob_as_seen_by_alice, fingerprint: bob_fp.clone() })
        .await;

    let event = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
        .await
        .expect("timed out waiting for the replayed send")
        .expect("channel closed");
    match event {
        TransportEvent::InboundMessage { message_id: got, plaintext, .. } => {
            assert_eq!(got, message_id);
            assert_eq!(plaintext, "queued while offline");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
