//! The lifecycle controller's timers are the safety net: even if no
//! connectivity event ever fires, a queued message still expires on
//! schedule and a reconnected peer still gets flushed to eventually.

use std::time::Duration;

use meshrelay_core::config::{CoreConfig, LifecycleConfig, RouterConfig};
use meshrelay_core::core::{Core, LocalIdentity};
use meshrelay_core::peer::TransportKind;
use meshrelay_core::transport::mesh::{AlwaysEstablished, InProcessMeshLink, MeshTransport};
use meshrelay_core::transport::relay::{InProcessRelayLink, RelayTransport};
use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, ShortPeerId, Timestamp};

type TestMesh = MeshTransport<InProcessMeshLink, AlwaysEstablished>;
type TestRelay = RelayTransport<InProcessRelayLink>;

fn fast_lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        outbox_cleanup: Duration::from_millis(20),
        tracker_cleanup: Duration::from_secs(3_600),
        relay_health: Duration::from_secs(3_600),
        periodic_flush: Duration::from_millis(20),
        peer_prune: Duration::from_secs(3_600),
    }
}

#[tokio::test(start_paused = true)]
async fn outbox_cleanup_timer_expires_a_stale_message_without_any_manual_call() {
    let alice_key = NoisePublicKey::new([60u8; 32]);
    let bob_key = NoisePublicKey::new([61u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);

    let (tx_a, rx_a) = tokio::sync::mpsc::channel(16);
    let config = CoreConfig {
        router: RouterConfig {
            outbox_ttl: Duration::from_millis(5),
            ..RouterConfig::default()
        },
        lifecycle: fast_lifecycle(),
    };
    let mut alice = Core::new(
        LocalIdentity { fingerprint: alice_fp, nickname: "alice".into() },
        None::<TestMesh>,
        None::<TestRelay>,
        config,
        rx_a,
    );
    let _ = tx_a;
    alice
        .peers()
        .observe_handshake(ShortPeerId::new("bob000000000060b"), &bob_key, "bob", TransportKind::Mesh, None, Timestamp::from_millis(0))
        .await;
    alice.router().send_private(bob_fp.clone(), "bob", "stale before anyone reads it", Timestamp::from_millis(0)).await;
    assert_eq!(alice.outbox().len(&bob_fp).await, 1);

    alice.spawn_lifecycle(fast_lifecycle());
    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;

    assert!(alice.outbox().is_empty(&bob_fp).await, "the outbox-cleanup timer should have purged the expired entry on its own");
}

#[tokio::test(start_paused = true)]
async fn periodic_flush_timer_delivers_once_connectivity_returns_with_no_event_fired() {
    let alice_key = NoisePublicKey::new([62u8; 32]);
    let bob_key = NoisePublicKey::new([63u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);

    let (alice_link, bob_link) = InProcessMeshLink::create_pair(ShortPeerId::new("alice00000000062"), ShortPeerId::new("bob000000000063b"));
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
        CoreConfig { lifecycle: fast_lifecycle(), ..CoreConfig::default() },
        rx_a,
    );
    alice.observe_peer(bob_as_seen_by_alice.clone(), &bob_key, "bob", TransportKind::Mesh).await;

    let message_id = alice.router().send_private(bob_fp.clone(), "bob", "waiting on the safety net", Timestamp::now()).await;
    assert_eq!(alice.outbox().len(&bob_fp).await, 1);

    alice.spawn_lifecycle(fast_lifecycle());

    // A few ticks pass while still disconnected: nothing should flush.
    tokio::time::advance(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;
    assert_eq!(alice.outbox().len(&bob_fp).await, 1);

    // The link comes back, but no `HandshakeCompleted` event is ever fired
    // — the periodic-flush timer alone should notice on its next tick.
    alice_link_handle.set_connected(&bob_as_seen_by_alice, true);
    tokio::time::advance(Duration::from_millis(60)).await;
    tokio::task::yield_now().await;

    let event = tokio::time::timeout(Duration::from_millis(10), rx_b.recv())
        .await
        .expect("periodic flush should have delivered the queued message")
        .expect("channel closed");
    match event {
        meshrelay_core::transport::TransportEvent::InboundMessage { message_id: got, .. } => assert_eq!(got, message_id),
        other => panic!("unexpected event: {other:?}"),
    }
}
