//! A simulated restart: snapshot a populated peer directory and chat store
//! into a shared key/value store, then rebuild fresh instances from it
//! alone, as a process restart would.

use meshrelay_core::chatstore::ChatStore;
use meshrelay_core::peer::{PeerDirectory, TransportKind};
use meshrelay_core::persistence::{self, InMemoryKvStore, KvStore, KEY_CHAT_ROOMS, KEY_PEERS};
use meshrelay_proto::identity::{Fingerprint, NoisePublicKey, RelayPublicKey, ShortPeerId, Timestamp};
use meshrelay_proto::message::MessageId;

#[tokio::test]
async fn peers_and_chat_history_survive_a_simulated_restart() {
    let kv = InMemoryKvStore::new();

    let alice_key = NoisePublicKey::new([50u8; 32]);
    let bob_key = NoisePublicKey::new([51u8; 32]);
    let alice_fp = Fingerprint::of(&alice_key);
    let bob_fp = Fingerprint::of(&bob_key);

    {
        let peers = PeerDirectory::new();
        peers
            .observe_handshake(ShortPeerId::new("alice00000000050"), &alice_key, "alice", TransportKind::Mesh, None, Timestamp::from_millis(0))
            .await;
        peers
            .observe_handshake(ShortPeerId::new("bob000000000051b"), &bob_key, "bob", TransportKind::Relay, None, Timestamp::from_millis(0))
            .await;
        peers.set_favorite(&bob_fp, true).await;
        peers.observe_relay_key(&bob_fp, RelayPublicKey::new("npub1notarealkeybutgoodenoughforatest")).await;

        let store = ChatStore::new();
        store.record_outgoing(&bob_fp, MessageId::new(), "hey bob", "alice", Timestamp::from_millis(100)).await;
        store.record_incoming(&bob_fp, "bob", MessageId::new(), "hey alice", Timestamp::from_millis(200)).await;

        let peers_bytes = persistence::snapshot_peers(&peers).await.unwrap();
        let rooms_bytes = persistence::snapshot_chat_rooms(&store).await.unwrap();
        kv.set(KEY_PEERS, peers_bytes).await.unwrap();
        kv.set(KEY_CHAT_ROOMS, rooms_bytes).await.unwrap();
    }

    // Fresh instances, as if the process had just started up again.
    let restored_peers = PeerDirectory::new();
    let restored_store = ChatStore::new();
    let peers_bytes = kv.get(KEY_PEERS).await.unwrap().expect("peers were persisted");
    let rooms_bytes = kv.get(KEY_CHAT_ROOMS).await.unwrap().expect("chat rooms were persisted");
    persistence::restore_peers(&restored_peers, &peers_bytes).await.unwrap();
    persistence::restore_chat_rooms(&restored_store, &rooms_bytes).await.unwrap();

    let alice_record = restored_peers.resolve_by_fingerprint(&alice_fp).await.expect("alice should be restored");
    assert_eq!(alice_record.nickname, "alice");
    assert!(!alice_record.favorite);

    let bob_record = restored_peers.resolve_by_fingerprint(&bob_fp).await.expect("bob should be restored");
    assert_eq!(bob_record.nickname, "bob");
    assert!(bob_record.favorite, "favorite status must survive a restart");
    assert_eq!(bob_record.relay_public_key.as_ref().map(|k| k.as_str()), Some("npub1notarealkeybutgoodenoughforatest"));

    let room = restored_store.get(&bob_fp).await.expect("bob's chat room should be restored");
    assert_eq!(room.history().len(), 2);
    let mut contents: Vec<&str> = room.history().iter().map(|m| m.content.as_str()).collect();
    contents.sort_unstable();
    assert_eq!(contents, vec!["hey alice", "hey bob"]);
}

#[tokio::test]
async fn selected_room_key_round_trips_as_opaque_bytes() {
    // The selected-room and pending-invitations keys carry UI/session state
    // this crate does not interpret; persistence only needs to move the
    // bytes faithfully.
    let kv = InMemoryKvStore::new();
    let fingerprint = Fingerprint::from_hex("ef".repeat(32));
    let encoded = serde_json::to_vec(&fingerprint.as_str()).unwrap();
    kv.set(persistence::KEY_SELECTED_ROOM, encoded.clone()).await.unwrap();

    let back = kv.get(persistence::KEY_SELECTED_ROOM).await.unwrap();
    assert_eq!(back, Some(encoded));
}

#[tokio::test]
async fn restoring_an_empty_store_leaves_the_directory_empty() {
    let peers = PeerDirectory::new();
    let empty = persistence::snapshot_peers(&PeerDirectory::new()).await.unwrap();
    persistence::restore_peers(&peers, &empty).await.unwrap();
    assert!(peers.snapshot().await.is_empty());
}
