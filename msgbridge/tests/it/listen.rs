use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::FutureExt;
use msgbridge::{
    cfg::Config,
    chain::{EventRecord, Extrinsic, Phase, RuntimeEvent},
    client::ListenArgs,
    error::{ConfirmationError, ErrorKind},
    fake_chain::signature_submitted,
    listener,
};
use tokio::sync::oneshot;

use crate::{
    CHAIN, MESSAGE, OTHER_MESSAGE, proof_of, setup, setup_with_config, signature, submitted,
    validator, validators,
};

#[tokio::test]
async fn confirms_once_seventy_percent_have_signed() {
    let (chain, client) = setup(10);
    chain.add_block(
        1,
        Some(6_000),
        vec![submitted(1, 1), submitted(1, 2), submitted(2, 3)],
    );
    chain.add_block(2, Some(12_000), vec![submitted(1, 4), submitted(1, 5)]);
    chain.add_block(3, Some(18_000), vec![submitted(1, 6), submitted(2, 7)]);
    chain.add_block(4, Some(24_000), vec![submitted(1, 8)]);
    chain.set_heads(vec![1, 2, 3, 4]);

    let confirmation = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap();

    assert_eq!(confirmation.proof.to_vec(), proof_of(&[1, 2, 3, 4, 5, 6, 7]));
    assert_eq!(confirmation.timestamp, 18_000);
    assert_eq!(chain.subscriptions(), 1);
    assert_eq!(chain.unsubscribes(), 1);
    assert_eq!(chain.open_subscriptions(), 0);
    // Nothing after the confirming head is pulled from the subscription.
    assert_eq!(chain.heads_delivered(), 3);
}

#[tokio::test]
async fn times_out_after_the_head_budget() {
    let (chain, client) = setup(10);
    for number in 1..=5 {
        chain.add_block(
            number,
            Some(number * 6_000),
            vec![submitted(1, number as u8)],
        );
    }
    chain.set_heads(vec![1, 2, 3, 4, 5]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, Some(2))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ConfirmationError::ListenTimeout { fingerprint, heads: 3 } if fingerprint == MESSAGE
    ));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(chain.heads_delivered(), 3);
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn configured_timeout_is_the_default() {
    let config = Config {
        listen_timeout: 1,
        ..Config::default()
    };
    let (chain, client) = setup_with_config(3, config);
    chain.add_block(1, Some(6_000), vec![]);
    chain.add_block(2, Some(12_000), vec![]);
    chain.add_block(3, Some(18_000), vec![]);
    chain.set_heads(vec![1, 2, 3]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::ListenTimeout { heads: 2, .. }));
}

#[tokio::test]
async fn repeated_signatures_count_once() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.add_block(
        2,
        Some(12_000),
        vec![
            signature_submitted(1, validator(1), MESSAGE, vec![0xee; 65]),
            submitted(2, 2),
        ],
    );
    chain.add_block(3, Some(18_000), vec![submitted(1, 1)]);
    chain.add_block(4, Some(24_000), vec![submitted(1, 3)]);
    chain.set_heads(vec![1, 2, 3, 4]);

    let confirmation = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap();

    // The first signature seen from validator 1 is the one that ends up in the proof.
    assert_eq!(confirmation.proof.to_vec(), proof_of(&[1, 2, 3]));
    assert_eq!(confirmation.timestamp, 24_000);
    assert_eq!(chain.heads_delivered(), 4);
}

#[tokio::test]
async fn blocks_without_a_timestamp_are_skipped() {
    let (chain, client) = setup(1);
    chain.add_block(1, None, vec![submitted(1, 1)]);
    chain.add_block(
        2,
        Some(12_000),
        vec![signature_submitted(1, validator(1), MESSAGE, vec![0x02; 65])],
    );
    chain.set_heads(vec![1, 2]);

    let confirmation = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap();
    assert_eq!(confirmation.proof.to_vec(), vec![0x02; 65]);
    assert_eq!(confirmation.timestamp, 12_000);
    // The skipped block's events are never fetched.
    assert_eq!(chain.event_queries(), 1);
}

#[tokio::test]
async fn skipped_block_does_not_end_the_attempt() {
    let (chain, client) = setup(1);
    chain.add_block(1, Some(6_000), vec![]);
    chain.add_block(2, None, vec![]);
    chain.add_block(3, Some(18_000), vec![submitted(1, 1)]);
    chain.set_heads(vec![1, 2, 3]);

    // The second head is over the budget, but it is skipped rather than evaluated.
    let confirmation = client
        .listen_for_confirmation(MESSAGE, CHAIN, Some(1))
        .await
        .unwrap();
    assert_eq!(confirmation.proof.to_vec(), proof_of(&[1]));
    assert_eq!(confirmation.timestamp, 18_000);
    assert_eq!(chain.heads_delivered(), 3);
}

#[tokio::test]
async fn skipped_blocks_count_towards_the_timeout() {
    let (chain, client) = setup(1);
    chain.add_block(1, None, vec![submitted(1, 1)]);
    chain.add_block(2, None, vec![submitted(1, 1)]);
    chain.add_block(3, Some(18_000), vec![]);
    chain.add_block(4, Some(24_000), vec![submitted(1, 1)]);
    chain.set_heads(vec![1, 2, 3, 4]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, Some(1))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::ListenTimeout { heads: 3, .. }));
    assert_eq!(chain.event_queries(), 1);
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn unrelated_events_are_ignored() {
    let (chain, client) = setup(2);
    chain.add_block_with_extrinsics(
        1,
        vec![
            Extrinsic::TimestampSet { now: 6_000 },
            Extrinsic::Other {
                section: "attestation".to_owned(),
                method: "submitSignature".to_owned(),
            },
        ],
        vec![
            // Not a validator.
            signature_submitted(1, validator(9), MESSAGE, signature(9)),
            // Another message.
            signature_submitted(1, validator(1), OTHER_MESSAGE, signature(1)),
            // Emitted outside of any extrinsic.
            EventRecord {
                phase: Phase::Finalization,
                ..submitted(0, 2)
            },
            // Refers to an extrinsic the block does not have.
            submitted(4, 2),
            EventRecord {
                phase: Phase::ApplyExtrinsic(1),
                event: RuntimeEvent::Other {
                    section: "balances".to_owned(),
                    method: "Deposit".to_owned(),
                },
            },
        ],
    );
    chain.add_block(2, Some(12_000), vec![submitted(1, 2), submitted(1, 1)]);
    chain.set_heads(vec![1, 2]);

    let confirmation = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap();
    assert_eq!(confirmation.proof.to_vec(), proof_of(&[2, 1]));
    assert_eq!(confirmation.timestamp, 12_000);
}

#[tokio::test]
async fn upstream_failure_ends_the_attempt() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.add_block(2, Some(12_000), vec![submitted(1, 2)]);
    chain.add_block(3, Some(18_000), vec![submitted(1, 3)]);
    chain.fail_events_at(2);
    chain.set_heads(vec![1, 2, 3]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(chain.heads_delivered(), 2);
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn unknown_block_is_not_found() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![]);
    chain.set_heads(vec![1, 7]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::BlockNotFound { block: 7 }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn closed_subscription_is_upstream() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.set_heads(vec![1]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Upstream);
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn empty_validator_set_never_subscribes() {
    let (chain, client) = setup(0);
    chain.set_heads(vec![1]);

    let err = client
        .listen_for_confirmation(MESSAGE, CHAIN, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmationError::EmptyValidatorSet { block: None }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(chain.subscriptions(), 0);
}

#[tokio::test]
async fn listen_uses_the_given_snapshot() {
    let (chain, _) = setup(10);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1), submitted(1, 2)]);
    chain.set_heads(vec![1]);

    // Two of the chain's validators make a quorum of this smaller snapshot.
    let snapshot = validators(2).into_iter().collect();
    let confirmation = listener::listen(chain.as_ref(), MESSAGE, snapshot, 20)
        .await
        .unwrap();
    assert_eq!(confirmation.proof.to_vec(), proof_of(&[1, 2]));
    assert_eq!(chain.validator_queries(), 0);
}

#[tokio::test]
async fn spawned_listener_reports_confirmation() {
    let (chain, client) = setup(1);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.set_heads(vec![1]);

    let (tx, rx) = oneshot::channel();
    let handle = client.spawn_listener(
        MESSAGE,
        CHAIN,
        ListenArgs::new(move |confirmation| async move {
            tx.send(confirmation).unwrap();
        }),
    );

    handle.await.unwrap().unwrap();
    let confirmation = rx.await.unwrap();
    assert_eq!(confirmation.timestamp, 6_000);
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn spawned_listener_reports_errors_to_the_callback() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![]);
    chain.add_block(2, Some(12_000), vec![]);
    chain.set_heads(vec![1, 2]);

    let confirmed = Arc::new(AtomicBool::new(false));
    let flag = confirmed.clone();
    let (tx, rx) = oneshot::channel();
    let handle = client.spawn_listener(
        MESSAGE,
        CHAIN,
        ListenArgs::new(move |_| async move { flag.store(true, Ordering::SeqCst) })
            .on_error(move |e| tx.send(e.kind()).unwrap())
            .timeout(1),
    );

    handle.await.unwrap().unwrap();
    assert_eq!(rx.await.unwrap(), ErrorKind::Timeout);
    assert!(!confirmed.load(Ordering::SeqCst));
    assert_eq!(chain.unsubscribes(), 1);
}

#[tokio::test]
async fn spawned_listener_without_error_callback_returns_the_error() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![]);
    chain.add_block(2, Some(12_000), vec![]);
    chain.set_heads(vec![1, 2]);

    let handle = client.spawn_listener(
        MESSAGE,
        CHAIN,
        ListenArgs::new(|_| async {}).timeout(1),
    );

    let err = handle.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn concurrent_listeners_keep_separate_tallies() {
    let (chain, client) = setup(1);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.add_block(
        2,
        Some(12_000),
        vec![signature_submitted(1, validator(1), OTHER_MESSAGE, vec![0x0b; 65])],
    );
    chain.set_heads(vec![1, 2]);

    let (first, second) = tokio::join!(
        client.listen_for_confirmation(MESSAGE, CHAIN, None),
        client.listen_for_confirmation(OTHER_MESSAGE, CHAIN, None),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.proof.to_vec(), proof_of(&[1]));
    assert_eq!(first.timestamp, 6_000);
    assert_eq!(second.proof.to_vec(), vec![0x0b; 65]);
    assert_eq!(second.timestamp, 12_000);
    assert_eq!(chain.subscriptions(), 2);
    assert_eq!(chain.unsubscribes(), 2);
}

#[tokio::test]
async fn dropped_attempt_releases_its_subscription() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.set_heads(vec![1]);
    chain.hold_subscriptions_open();

    // The fake answers immediately, so a single poll runs the attempt until it waits for a head
    // that never arrives.
    let attempt = client.listen_for_confirmation(MESSAGE, CHAIN, None);
    assert!(attempt.now_or_never().is_none());

    assert_eq!(chain.subscriptions(), 1);
    assert_eq!(chain.heads_delivered(), 1);
    assert_eq!(chain.unsubscribes(), 0);
    assert_eq!(chain.open_subscriptions(), 0);
}

#[tokio::test]
async fn aborted_listener_releases_its_subscription() {
    let (chain, client) = setup(3);
    chain.add_block(1, Some(6_000), vec![submitted(1, 1)]);
    chain.set_heads(vec![1]);
    chain.hold_subscriptions_open();

    let handle = client.spawn_listener(MESSAGE, CHAIN, ListenArgs::new(|_| async {}));
    while chain.heads_delivered() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(chain.open_subscriptions(), 1);

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert_eq!(chain.unsubscribes(), 0);
    assert_eq!(chain.open_subscriptions(), 0);
}
