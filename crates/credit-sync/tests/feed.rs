//! Change feed integration tests.

mod common;

use common::TestHarness;
use credit_sync_core::{ChangeEvent, Language, SubscriptionRecord};

#[tokio::test]
async fn trial_user_becomes_subscribed() {
    let harness = TestHarness::new();
    harness.ready().await;

    harness
        .gateway
        .insert_record(SubscriptionRecord::new(harness.user_id, 50));

    let replica = harness.wait_for(|replica| replica.is_subscribed).await;
    assert_eq!(replica.credits, 50);
    assert!(replica.is_initialized);
}

#[tokio::test]
async fn cancellation_zeroes_credits() {
    let harness = TestHarness::new().with_record(12);
    harness.ready().await;

    harness.gateway.delete_record(&harness.user_id);

    let replica = harness.wait_for(|replica| !replica.is_subscribed).await;
    assert_eq!(replica.credits, 0);
}

#[tokio::test]
async fn remote_updates_win() {
    let harness = TestHarness::new().with_record(12);
    harness.ready().await;

    harness.gateway.insert_record(
        SubscriptionRecord::new(harness.user_id, 30).with_language(Language::Typescript),
    );

    let replica = harness.wait_for(|replica| replica.credits == 30).await;
    assert_eq!(replica.preferred_language, Language::Typescript);
}

#[tokio::test]
async fn reapplied_events_are_idempotent() {
    let harness = TestHarness::new().with_record(12);
    harness.ready().await;

    let event = ChangeEvent::updated(None, SubscriptionRecord::new(harness.user_id, 8));
    harness.gateway.push_event(&event);
    harness.wait_for(|replica| replica.credits == 8).await;

    harness.gateway.push_event(&event);
    harness.gateway.push_event(&event);
    TestHarness::quiesce().await;

    assert_eq!(harness.sync.replica().credits, 8);
}

#[tokio::test]
async fn events_apply_in_delivery_order() {
    let harness = TestHarness::new().with_record(12);
    harness.ready().await;

    for credits in [11, 10, 20, 19] {
        harness
            .gateway
            .insert_record(SubscriptionRecord::new(harness.user_id, credits));
    }
    TestHarness::quiesce().await;

    assert_eq!(harness.sync.replica().credits, 19);
}

#[tokio::test]
async fn language_change_is_confirmed_by_feed() {
    let harness = TestHarness::new().with_record(12);
    harness.ready().await;

    let replica = harness
        .sync
        .set_preferred_language(Language::Rust)
        .await
        .unwrap();
    assert_eq!(replica.preferred_language, Language::Rust);

    TestHarness::quiesce().await;
    assert_eq!(harness.sync.replica().preferred_language, Language::Rust);
    assert_eq!(
        harness.gateway.record(&harness.user_id).unwrap().preferred_language,
        Language::Rust
    );
}

#[tokio::test]
async fn readers_on_other_threads_see_changes() {
    let harness = TestHarness::new().with_record(12);
    harness.ready().await;
    let reader = harness.sync.reader();

    harness
        .gateway
        .insert_record(SubscriptionRecord::new(harness.user_id, 3));
    harness.wait_for(|replica| replica.credits == 3).await;

    let seen = std::thread::spawn(move || reader.latest()).join().unwrap();
    assert_eq!(seen.credits, 3);
    assert!(seen.is_initialized);
}
