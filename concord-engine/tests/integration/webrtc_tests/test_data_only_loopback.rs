use bytes::Bytes;
use concord_engine::{ChannelKind, ConnectivityState, WebrtcConnectionFactory};
use std::sync::Arc;

use crate::integration::init_tracing;
use crate::utils::{ObservedEvent, Relay, spawn_session, test_config, wait_until};

#[tokio::test]
async fn test_data_only_peers_exchange_messages() {
    init_tracing();

    let relay = Relay::new();
    let alice = spawn_session(
        &relay,
        "alice",
        ChannelKind::DataOnly,
        test_config(),
        Arc::new(WebrtcConnectionFactory::new(test_config())),
    )
    .await;
    let bob = spawn_session(
        &relay,
        "bob",
        ChannelKind::DataOnly,
        test_config(),
        Arc::new(WebrtcConnectionFactory::new(test_config())),
    )
    .await;
    relay.announce_all().await;

    let opened = |id: &'static str| {
        move |e: &ObservedEvent| {
            matches!(e, ObservedEvent::DataChannelOpen { peer_id, label }
                if peer_id.as_str() == id && label == "data")
        }
    };
    assert!(
        alice.observer.wait_for(opened("bob"), 10_000).await,
        "alice never saw the data channel open"
    );
    assert!(
        bob.observer.wait_for(opened("alice"), 10_000).await,
        "bob never saw the data channel open"
    );

    alice
        .coordinator
        .send_to(&bob.id, Bytes::from_static(b"hello bob"))
        .await
        .expect("send to bob");
    bob.coordinator
        .send_to(&alice.id, Bytes::from_static(b"hello alice"))
        .await
        .expect("send to alice");

    let got = |text: &'static [u8]| {
        move |e: &ObservedEvent| matches!(e, ObservedEvent::Message { data, .. } if data == text)
    };
    assert!(bob.observer.wait_for(got(b"hello bob"), 5000).await);
    assert!(alice.observer.wait_for(got(b"hello alice"), 5000).await);

    assert_eq!(alice.signaling.count("offer").await + bob.signaling.count("offer").await, 1);
    assert!(alice.signaling.count("candidate").await > 0);

    let (a, b) = (&alice, &bob);
    let connected = wait_until(5000, || async move {
        a.coordinator.connectivity_state(&b.id).await == Some(ConnectivityState::Connected)
    })
    .await;
    assert!(connected);

    alice.coordinator.close_all().await;
    assert!(alice.coordinator.peers().is_empty());
    assert_eq!(alice.observer.closed_count(&bob.id).await, 1);
}
