use bytes::Bytes;
use concord_core::MediaKind;
use concord_engine::{ChannelKind, ConnectivityState, NegotiationConfig, SignalingPhase};

use crate::integration::init_tracing;
use crate::utils::{
    MockConnectionFactory, ObservedEvent, Relay, TestSession, spawn_mock_session, test_config,
    wait_until,
};

async fn connected_pair(
    kind: ChannelKind,
    config: NegotiationConfig,
) -> (Relay, TestSession, MockConnectionFactory, TestSession, MockConnectionFactory) {
    let relay = Relay::new();
    let (alice, alice_factory) = spawn_mock_session(&relay, "alice", kind, config.clone()).await;
    let (bob, bob_factory) = spawn_mock_session(&relay, "bob", kind, config).await;
    relay.announce_all().await;

    let (a, b) = (&alice, &bob);
    let settled = wait_until(2000, || async move {
        let x = a.coordinator.snapshot(&b.id).await;
        let y = b.coordinator.snapshot(&a.id).await;
        x.is_some_and(|s| s.negotiated && s.phase == SignalingPhase::Stable)
            && y.is_some_and(|s| s.negotiated && s.phase == SignalingPhase::Stable)
    })
    .await;
    assert!(settled, "pair never settled");

    (relay, alice, alice_factory, bob, bob_factory)
}

#[tokio::test]
async fn test_local_candidates_are_relayed() {
    init_tracing();

    let (_relay, alice, alice_factory, bob, bob_factory) =
        connected_pair(ChannelKind::DataOnly, test_config()).await;

    let candidate = "candidate:9 1 udp 2122260223 10.1.1.9 50009 typ host";
    alice_factory
        .connection(&bob.id)
        .unwrap()
        .emit_local_candidate(candidate)
        .await;

    let remote = bob_factory.connection(&alice.id).unwrap();
    let applied = wait_until(1000, || {
        let remote = remote.clone();
        async move { remote.applied_candidates() == vec![candidate.to_owned()] }
    })
    .await;
    assert!(applied);
    assert_eq!(alice.signaling.count("candidate").await, 1);
}

#[tokio::test]
async fn test_ice_failure_restarts_until_exhausted() {
    init_tracing();

    let config = NegotiationConfig {
        max_ice_restarts: 1,
        ..test_config()
    };
    let (_relay, alice, alice_factory, bob, _) =
        connected_pair(ChannelKind::DataOnly, config).await;
    let connection = alice_factory.connection(&bob.id).unwrap();

    connection.emit_ice_failed().await;
    let (a, b) = (&alice, &bob);
    let restarted = wait_until(2000, || async move {
        a.signaling.count("offer").await == 2
            && a.coordinator
                .snapshot(&b.id)
                .await
                .is_some_and(|s| s.phase == SignalingPhase::Stable)
    })
    .await;
    assert!(restarted, "no restart offer");
    assert_eq!(connection.ice_restarts(), 1);

    // Reaching connected again restores the restart budget.
    connection.set_connectivity(ConnectivityState::Connected).await;
    let reset = wait_until(1000, || async move {
        a.observer
            .count(|e| {
                matches!(
                    e,
                    ObservedEvent::Connectivity {
                        state: ConnectivityState::Connected,
                        ..
                    }
                )
            })
            .await
            == 1
    })
    .await;
    assert!(reset);
    assert_eq!(
        alice
            .coordinator
            .snapshot(&bob.id)
            .await
            .unwrap()
            .restart_attempts,
        0
    );

    connection.emit_ice_failed().await;
    let restarted_again = wait_until(2000, || async move {
        a.signaling.count("offer").await == 3
    })
    .await;
    assert!(restarted_again);

    // Second failure without recovery exceeds the budget: reported, then closed.
    connection.emit_ice_failed().await;
    let closed = wait_until(2000, || async move {
        a.observer.closed_count(&b.id).await == 1
    })
    .await;
    assert!(closed);
    assert_eq!(
        alice
            .observer
            .count(|e| matches!(e, ObservedEvent::Failed { .. }))
            .await,
        1
    );
    assert!(connection.is_closed());
}

#[tokio::test]
async fn test_exhaustion_without_auto_close_keeps_peer() {
    init_tracing();

    let config = NegotiationConfig {
        max_ice_restarts: 0,
        close_on_failure: false,
        ..test_config()
    };
    let (_relay, alice, alice_factory, bob, _) =
        connected_pair(ChannelKind::DataOnly, config).await;

    alice_factory
        .connection(&bob.id)
        .unwrap()
        .emit_ice_failed()
        .await;

    let a = &alice;
    let failed = wait_until(1000, || async move {
        a.observer
            .count(|e| matches!(e, ObservedEvent::Failed { .. }))
            .await
            == 1
    })
    .await;
    assert!(failed);
    assert!(alice.coordinator.contains(&bob.id));
    assert_eq!(alice.observer.closed_count(&bob.id).await, 0);
}

#[tokio::test]
async fn test_remote_tracks_filtered_by_kind() {
    init_tracing();

    let (_relay, alice, alice_factory, bob, _) =
        connected_pair(ChannelKind::VoiceOnly, test_config()).await;
    let connection = alice_factory.connection(&bob.id).unwrap();

    connection.emit_remote_track(MediaKind::Video, "cam").await;
    connection.emit_remote_track(MediaKind::Audio, "mic").await;

    let observer = alice.observer.clone();
    let got_audio = wait_until(1000, || {
        let observer = observer.clone();
        async move {
            observer
                .count(|e| {
                    matches!(
                        e,
                        ObservedEvent::RemoteTrack {
                            kind: MediaKind::Audio,
                            ..
                        }
                    )
                })
                .await
                == 1
        }
    })
    .await;
    assert!(got_audio);
    assert_eq!(
        alice
            .observer
            .count(|e| matches!(e, ObservedEvent::RemoteTrack { .. }))
            .await,
        1
    );
}

#[tokio::test]
async fn test_data_messages_reach_observer() {
    init_tracing();

    let (_relay, alice, alice_factory, bob, _) =
        connected_pair(ChannelKind::DataOnly, test_config()).await;
    let connection = alice_factory.connection(&bob.id).unwrap();

    connection.emit_message(b"first").await;
    connection.emit_message(b"second").await;

    let a = &alice;
    let received = wait_until(1000, || async move {
        a.observer
            .count(|e| matches!(e, ObservedEvent::Message { .. }))
            .await
            == 2
    })
    .await;
    assert!(received);

    let payloads: Vec<_> = alice
        .observer
        .get_events()
        .await
        .into_iter()
        .filter_map(|e| match e {
            ObservedEvent::Message { data, .. } => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(
        payloads,
        vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
    );
}

#[tokio::test]
async fn test_connection_closed_event_tears_down_peer() {
    init_tracing();

    let (_relay, alice, alice_factory, bob, _) =
        connected_pair(ChannelKind::DataOnly, test_config()).await;

    alice_factory
        .connection(&bob.id)
        .unwrap()
        .set_connectivity(ConnectivityState::Closed)
        .await;

    let a = &alice;
    let b_id = &bob.id;
    let closed = wait_until(1000, || async move {
        a.observer.closed_count(b_id).await == 1
    })
    .await;
    assert!(closed);
    assert!(!alice.coordinator.contains(&bob.id));
}

#[tokio::test]
async fn test_failed_connection_state_is_reported_only() {
    init_tracing();

    let (_relay, alice, alice_factory, bob, _) =
        connected_pair(ChannelKind::DataOnly, test_config()).await;

    alice_factory
        .connection(&bob.id)
        .unwrap()
        .set_connectivity(ConnectivityState::Failed)
        .await;

    let a = &alice;
    let reported = wait_until(1000, || async move {
        a.observer
            .count(|e| {
                matches!(
                    e,
                    ObservedEvent::Connectivity {
                        state: ConnectivityState::Failed,
                        ..
                    }
                )
            })
            .await
            == 1
    })
    .await;
    assert!(reported);

    // Recovery is driven by the ICE failure event, not the aggregate state.
    assert!(alice.coordinator.contains(&bob.id));
    assert_eq!(alice.signaling.count("offer").await, 1);
    assert_eq!(alice.observer.closed_count(&bob.id).await, 0);
}
