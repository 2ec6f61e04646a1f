//! Session lifecycle integration tests.

mod common;

use common::TestHarness;
use credit_sync::SyncError;
use credit_sync_core::{Language, Phase, Replica, SubscriptionRecord, UserId};
use credit_sync_gateway::GatewayError;

// ============================================================================
// Initialization
// ============================================================================

#[tokio::test]
async fn user_without_record_is_a_trial_user() {
    let harness = TestHarness::new();

    let replica = harness.ready().await;

    assert_eq!(
        replica,
        Replica {
            is_subscribed: false,
            credits: 1,
            preferred_language: Language::Python,
            is_initialized: true,
        }
    );
    assert_eq!(harness.sync.reader().latest(), replica);
    let stats = harness.gateway.stats();
    assert_eq!(stats.updates, 0);
    assert_eq!(stats.decrements, 0);
}

#[tokio::test]
async fn subscribed_user_is_copied_from_record() {
    let harness = TestHarness::new();
    harness.gateway.insert_record(
        SubscriptionRecord::new(harness.user_id, 40).with_language(Language::Kotlin),
    );

    let replica = harness.ready().await;

    assert!(replica.is_subscribed);
    assert_eq!(replica.credits, 40);
    assert_eq!(replica.preferred_language, Language::Kotlin);
    assert_eq!(harness.sync.phase(), Phase::Ready);
}

#[tokio::test]
async fn failed_first_read_is_not_defaulted() {
    let harness = TestHarness::new().with_record(5);
    harness
        .gateway
        .fail_next_read(GatewayError::Network("connection reset".into()));

    let err = harness.sync.start_session(harness.user_id).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(harness.sync.phase(), Phase::Uninitialized);
    assert_eq!(harness.sync.replica(), Replica::default());
    assert_eq!(harness.sync.identity(), Some(harness.user_id));

    let replica = harness.sync.initialize().await.unwrap();
    assert_eq!(replica.credits, 5);
    assert!(replica.is_initialized);
    assert_eq!(harness.gateway.live_subscriptions(&harness.user_id), 1);
}

#[tokio::test]
async fn changes_between_failed_read_and_retry_do_not_leak() {
    let harness = TestHarness::new();
    harness
        .gateway
        .fail_next_read(GatewayError::Network("timeout".into()));
    harness.sync.start_session(harness.user_id).await.unwrap_err();

    harness
        .gateway
        .insert_record(SubscriptionRecord::new(harness.user_id, 30));
    harness.gateway.delete_record(&harness.user_id);
    TestHarness::quiesce().await;

    let replica = harness.sync.initialize().await.unwrap();
    assert!(harness.gateway.record(&harness.user_id).is_none());
    assert_eq!(replica, Replica::absent_record());
    assert_eq!(harness.sync.reader().latest().credits, 1);
}

#[tokio::test]
async fn failed_feed_setup_is_surfaced() {
    let harness = TestHarness::new().with_record(5);
    harness
        .gateway
        .fail_next_subscribe(GatewayError::Subscription("channel error".into()));

    let err = harness.sync.start_session(harness.user_id).await.unwrap_err();

    assert!(matches!(err, SyncError::SubscriptionSetup(_)));
    assert!(!harness.sync.replica().is_initialized);
    assert_eq!(harness.gateway.total_live_subscriptions(), 0);
}

// ============================================================================
// Identity switch
// ============================================================================

#[tokio::test]
async fn switching_identity_leaves_one_subscription() {
    let harness = TestHarness::new().with_record(5);
    let user_b = UserId::generate();
    harness
        .gateway
        .insert_record(SubscriptionRecord::new(user_b, 9));

    harness.ready().await;
    let replica = harness.sync.start_session(user_b).await.unwrap();

    assert_eq!(replica.credits, 9);
    assert_eq!(harness.sync.identity(), Some(user_b));
    assert_eq!(harness.gateway.live_subscriptions(&harness.user_id), 0);
    assert_eq!(harness.gateway.live_subscriptions(&user_b), 1);
    assert_eq!(harness.gateway.total_live_subscriptions(), 1);
}

#[tokio::test]
async fn previous_identity_changes_are_ignored_after_switch() {
    let harness = TestHarness::new().with_record(5);
    let user_b = UserId::generate();
    harness
        .gateway
        .insert_record(SubscriptionRecord::new(user_b, 9));

    harness.ready().await;
    harness.sync.start_session(user_b).await.unwrap();

    harness
        .gateway
        .insert_record(SubscriptionRecord::new(harness.user_id, 100));
    harness.gateway.delete_record(&harness.user_id);
    TestHarness::quiesce().await;

    let replica = harness.sync.replica();
    assert!(replica.is_subscribed);
    assert_eq!(replica.credits, 9);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn teardown_unsubscribes_and_resets() {
    let harness = TestHarness::new().with_record(5);
    harness.ready().await;

    harness.sync.teardown().await;

    assert_eq!(harness.sync.phase(), Phase::TornDown);
    assert_eq!(harness.sync.identity(), None);
    assert_eq!(harness.sync.replica(), Replica::default());
    assert_eq!(harness.sync.reader().latest(), Replica::default());
    assert_eq!(harness.gateway.total_live_subscriptions(), 0);

    harness
        .gateway
        .insert_record(SubscriptionRecord::new(harness.user_id, 2));
    TestHarness::quiesce().await;
    assert_eq!(harness.sync.replica(), Replica::default());
}

#[tokio::test]
async fn teardown_then_reinitialize_is_identical() {
    let harness = TestHarness::new();
    harness.gateway.insert_record(
        SubscriptionRecord::new(harness.user_id, 7).with_language(Language::Swift),
    );

    let first = harness.ready().await;
    harness.sync.teardown().await;
    let second = harness.ready().await;

    assert_eq!(first, second);
    assert_eq!(harness.gateway.total_live_subscriptions(), 1);
}

#[tokio::test]
async fn teardown_without_identity_is_harmless() {
    let harness = TestHarness::new();
    harness.sync.teardown().await;
    assert_eq!(harness.sync.identity(), None);
    assert_eq!(harness.gateway.stats().unsubscribes, 0);
}

#[tokio::test]
async fn debits_after_teardown_are_skipped() {
    let harness = TestHarness::new().with_record(5);
    harness.ready().await;
    harness.sync.teardown().await;

    let outcome = harness.sync.on_billable_action_completed().await.unwrap();

    assert!(matches!(outcome, credit_sync::DebitOutcome::Skipped { .. }));
    assert_eq!(harness.gateway.record(&harness.user_id).unwrap().credits, 5);
}
