use concord_engine::{
    ChannelKind, IgnoreReason, NegotiationConfig, NegotiationError, Outcome, SignalingPhase,
};

use crate::integration::init_tracing;
use crate::utils::{
    ObservedEvent, TestPeer, deliver, exchange, negotiate, test_config, wait_until,
};

fn restart_config(max_ice_restarts: u32) -> NegotiationConfig {
    NegotiationConfig {
        max_ice_restarts,
        ..test_config()
    }
}

#[tokio::test]
async fn test_restart_sends_ice_restart_offer() {
    init_tracing();

    let mut alice = TestPeer::with_config("alice", ChannelKind::DataOnly, restart_config(3));
    let mut bob = TestPeer::with_config("bob", ChannelKind::DataOnly, restart_config(3));
    negotiate(&mut alice, &mut bob).await;

    let outcome = alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
    assert_eq!(outcome, Outcome::OfferSent);
    assert_eq!(alice.connection(&bob.id).ice_restarts(), 1);

    let offers = alice.signaling.offers_to(&bob.id).await;
    assert!(offers.last().unwrap().contains("ice-restart"));

    exchange(&mut alice, &mut bob).await;
    assert_eq!(alice.phase(&bob.id).await, Some(SignalingPhase::Stable));
    // Same connection, nothing torn down.
    assert_eq!(alice.factory.created_for(&bob.id), 1);
    assert_eq!(bob.factory.created_for(&alice.id), 1);
}

#[tokio::test]
async fn test_restart_allowed_while_offer_pending() {
    init_tracing();

    let mut alice = TestPeer::new("alice", ChannelKind::DataOnly);
    let mut bob = TestPeer::new("bob", ChannelKind::DataOnly);
    negotiate(&mut alice, &mut bob).await;

    alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
    assert_eq!(alice.phase(&bob.id).await, Some(SignalingPhase::HaveLocalOffer));

    // The first restart offer got lost; restart again from have-local-offer.
    let again = alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
    assert_eq!(again, Outcome::OfferSent);
    assert_eq!(alice.signaling.offers_to(&bob.id).await.len(), 3);
}

#[tokio::test]
async fn test_restart_exhaustion_is_terminal() {
    init_tracing();

    let mut alice = TestPeer::with_config("alice", ChannelKind::DataOnly, restart_config(2));
    let mut bob = TestPeer::with_config("bob", ChannelKind::DataOnly, restart_config(2));
    negotiate(&mut alice, &mut bob).await;

    for _ in 0..2 {
        let outcome = alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
        assert_eq!(outcome, Outcome::OfferSent);
        exchange(&mut alice, &mut bob).await;
    }

    let err = alice
        .coordinator
        .restart_connectivity(&bob.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::RestartExhausted { attempts: 2, .. }
    ));
    assert_eq!(
        alice
            .observer
            .count(|e| matches!(e, ObservedEvent::Failed { .. }))
            .await,
        1
    );

    // Terminal means the caller closes.
    assert!(alice.coordinator.contains(&bob.id));
    alice.coordinator.close(&bob.id).await;
    assert_eq!(alice.observer.closed_count(&bob.id).await, 1);
}

#[tokio::test]
async fn test_restart_before_negotiation_is_ignored() {
    let alice = TestPeer::new("alice", ChannelKind::DataOnly);
    let bob = TestPeer::new("bob", ChannelKind::DataOnly);

    assert_eq!(
        alice.coordinator.restart_connectivity(&bob.id).await.unwrap(),
        Outcome::Ignored(IgnoreReason::UnknownPeer)
    );

    alice.coordinator.register(&bob.id);
    assert_eq!(
        alice.coordinator.restart_connectivity(&bob.id).await.unwrap(),
        Outcome::Ignored(IgnoreReason::NotNegotiated)
    );
}

#[tokio::test]
async fn test_ignored_restart_does_not_spend_budget() {
    init_tracing();

    // Bob offers, so alice's connection is created after the gate is in place
    // without blocking the initial negotiation.
    let mut alice = TestPeer::with_config("alice", ChannelKind::DataOnly, restart_config(2));
    let mut bob = TestPeer::with_config("bob", ChannelKind::DataOnly, restart_config(2));
    let gate = alice.factory.gate_offers();
    negotiate(&mut bob, &mut alice).await;

    let coordinator = alice.coordinator.clone();
    let peer = bob.id.clone();
    let first = tokio::spawn(async move { coordinator.restart_connectivity(&peer).await });

    let (watched, id) = (&alice.coordinator, &bob.id);
    let offering = wait_until(1000, || async move {
        watched.snapshot(id).await.is_some_and(|s| s.making_offer)
    })
    .await;
    assert!(offering, "restart offer never started");

    let second = alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
    assert_eq!(second, Outcome::Ignored(IgnoreReason::OfferInFlight));

    gate.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), Outcome::OfferSent);
    assert_eq!(
        alice
            .coordinator
            .snapshot(&bob.id)
            .await
            .unwrap()
            .restart_attempts,
        1
    );

    gate.notify_one();
    let third = alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
    assert_eq!(third, Outcome::OfferSent);
    assert_eq!(alice.connection(&bob.id).ice_restarts(), 2);
    assert_eq!(
        alice
            .observer
            .count(|e| matches!(e, ObservedEvent::Failed { .. }))
            .await,
        0
    );
}

#[tokio::test]
async fn test_failed_answer_rolls_back_remote_offer() {
    init_tracing();

    let mut alice = TestPeer::new("alice", ChannelKind::DataOnly);
    let mut bob = TestPeer::new("bob", ChannelKind::DataOnly);
    negotiate(&mut alice, &mut bob).await;
    let applied = bob.connection(&alice.id).remote_description();

    bob.connection(&alice.id).fail_next_answer();
    let outcome = alice.coordinator.renegotiate(&bob.id).await.unwrap();
    assert_eq!(outcome, Outcome::OfferSent);

    let at_bob = deliver(&mut alice, &bob).await;
    assert!(matches!(
        at_bob[0],
        Err(NegotiationError::Description { .. })
    ));
    assert_eq!(bob.phase(&alice.id).await, Some(SignalingPhase::Stable));
    assert_eq!(bob.connection(&alice.id).remote_rollbacks(), 1);
    assert_eq!(bob.connection(&alice.id).remote_description(), applied);

    // The offering side recovers by restarting; the new offer is not a duplicate.
    let restart = alice.coordinator.restart_connectivity(&bob.id).await.unwrap();
    assert_eq!(restart, Outcome::OfferSent);
    let at_bob = deliver(&mut alice, &bob).await;
    assert_eq!(
        at_bob[0].as_ref().unwrap(),
        &Outcome::Answered { rolled_back: false }
    );
    exchange(&mut alice, &mut bob).await;
    assert_eq!(alice.phase(&bob.id).await, Some(SignalingPhase::Stable));
    assert_eq!(bob.phase(&alice.id).await, Some(SignalingPhase::Stable));
}
