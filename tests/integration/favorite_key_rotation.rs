//! A favorited peer's mesh handle rotates (a fresh BLE advertisement under
//! a new ephemeral id) while their long-lived fingerprint stays the same.
//! Routing must follow the fingerprint, not the stale handle.

use std::time::Duration;

use meshrelay_core::config::CoreConfig;
use meshrelay_core::core::{Core, LocalIdentity};
use meshrelay_core::peer::{PeerEvent, TransportKind};
use meshrelay_core::transport::TransportEvent;
use meshrelay_core::transport::mesh::{AlwaysEstablished, InProcessMeshLink, MeshTransport};
use meshrelay_core::transport::relay::{InProcessRelayBus, InProcessRelayLink, RelayTransport};
use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, RelayPublicKey, ShortPeerId, Timestamp};

type TestMesh = MeshTransport<InProcessMeshLink, AlwaysEstablished>;
type TestRelay = RelayTransport<InProcessRelayLink>;

#[tokio::test]
async fn message_queued_under_stale_handle_flushes_after_key_rotation() {
    let alice_key = NoisePublicKey::new([31u8; 32]);
    let bob_key = NoisePublicKey::new([32u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);
    let stale_short = ShortPeerId::new("bobstalestalesta");

    // The link only recognizes bob under his *new* handle; the directory
    // still has his stale one from a previous session.
    let (alice_link, bob_link) = InProcessMeshLink::create_pair(ShortPeerId::new("alice00000000031"), ShortPeerId::new("bob000000000031b"));
    let new_short = alice_link.peer().clone();

    let (tx_a, rx_a) = tokio::sync::mpsc::channel(16);
    let (tx_b, mut rx_b) = tokio::sync::mpsc::channel(16);
    let mesh_a = MeshTransport::new(alice_link, AlwaysEstablished, tx_a);
    let _mesh_b = MeshTransport::new(bob_link, AlwaysEstablished, tx_b);

    let mut alice = Core::new(
        LocalIdentity { fingerprint: alice_fp, nickname: "alice".into() },
        Some(mesh_a),
        None::<TestRelay>,
        CoreConfig::default(),
        rx_a,
    );
    alice.observe_peer(stale_short, &bob_key, "bob", TransportKind::Mesh).await;

    // Queued while the directory still points at the stale handle: the
    // mesh link does not recognize it, so the send stays queued.
    let message_id = alice.router().send_private(bob_fp.clone(), "bob", "rotated key test", Timestamp::now()).await;
    assert_eq!(alice.outbox().len(&bob_fp).await, 1);
    assert!(tokio::time::timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());

    // Bob reappears under his new handle; the directory update alone
    // reports a key rotation.
    let events = alice.observe_peer(new_short.clone(), &bob_key, "bob", TransportKind::Mesh).await;
    assert!(events.contains(&PeerEvent::KeyUpdated { fingerprint: bob_fp.clone() }));

    alice
        .handle_event(TransportEvent::HandshakeCompleted { short_peer_id: new_short.clone(), fingerprint: bob_fp.clone() })
        .await;

    let event = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
        .await
        .expect("timed out waiting for the replayed send under the rotated handle")
        .expect("channel closed");
    match event {
        TransportEvent::InboundMessage { message_id: got, .. } => assert_eq!(got, message_id),
        other => panic!("unexpected event: {other:?}"),
    }
    let record = alice.peers().resolve_by_fingerprint(&bob_fp).await.unwrap();
    assert_eq!(record.short_peer_id, new_short, "directory should now resolve bob under his rotated handle");
}

#[tokio::test]
async fn learning_a_relay_key_via_favorite_exchange_flushes_the_queued_send() {
    let alice_key = NoisePublicKey::new([33u8; 32]);
    let bob_key = NoisePublicKey::new([34u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);
    let bob_short = ShortPeerId::new("bob000000000034b");

    let bus = InProcessRelayBus::new();
    let alice_link = bus.join(ShortPeerId::new("alicealicealice3"));
    let bob_link = bus.join(bob_short.clone());
    let (tx_a, rx_a) = tokio::sync::mpsc::channel(16);
    let (tx_b, mut rx_b) = tokio::sync::mpsc::channel(16);
    let relay_a = RelayTransport::new(alice_link, tx_a);
    let _relay_b = RelayTransport::new(bob_link, tx_b);

    let mut alice = Core::new(
        LocalIdentity { fingerprint: alice_fp, nickname: "alice".into() },
        None::<TestMesh>,
        Some(relay_a),
        CoreConfig::default(),
        rx_a,
    );
    alice.observe_peer(bob_short.clone(), &bob_key, "bob", TransportKind::Relay).await;

    // No relay key known yet: the relay transport reports bob unreachable,
    // so the send stays queued.
    let message_id = alice.router().send_private(bob_fp.clone(), "bob", "waiting on a relay key", Timestamp::now()).await;
    assert_eq!(alice.outbox().len(&bob_fp).await, 1);
    assert!(tokio::time::timeout(Duration::from_millis(100), rx_b.recv()).await.is_err());

    // Bob's favorite exchange reveals his relay key. This alone, with no
    // further event, must be enough to flush the queued message.
    let relay_key = RelayPublicKey::new("npub1bobsrelaykeylearnedviafavorite");
    alice
        .handle_event(TransportEvent::FavoriteStatusChanged {
            sender_short: bob_short.clone(),
            on: true,
            peer_relay_key: Some(relay_key),
        })
        .await;

    let event = tokio::time::timeout(Duration::from_secs(1), rx_b.recv())
        .await
        .expect("timed out waiting for the flush triggered by learning the relay key")
        .expect("channel closed");
    match event {
        TransportEvent::InboundMessage { message_id: got, .. } => assert_eq!(got, message_id),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(alice.outbox().is_empty(&bob_fp).await);
}
