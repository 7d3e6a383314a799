// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (FIRESTORE_EMULATOR_HOST set). They are skipped otherwise.
//!
//! The emulator provides a clean state for each test run.

use hive_coupons::db::DocumentStore;
use hive_coupons::models::ProfileFields;
use hive_coupons::services::UserProfileStore;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::test_db;

/// Generate a unique uid for test isolation.
fn unique_uid() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test-{}", nanos)
}

fn name_fields(name: &str) -> ProfileFields {
    ProfileFields {
        display_name: Some(name.to_string()),
        phone_number: Some("+821099998888".to_string()),
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROFILE TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_new_profile_creation() {
    require_emulator!();

    let store = UserProfileStore::new(Arc::new(test_db().await));
    let uid = unique_uid();

    // Initially, profile should not exist
    let before = store.get_user(&uid).await.unwrap();
    assert!(before.is_none(), "Profile should not exist before creation");

    store.save_user(&uid, name_fields("Alice")).await.unwrap();

    let profile = store.get_user(&uid).await.unwrap().expect("profile exists");
    assert_eq!(profile.uid, uid);
    assert_eq!(profile.display_name.as_deref(), Some("Alice"));
    assert_eq!(profile.phone_number.as_deref(), Some("+821099998888"));
    assert!(profile.created_at.is_some());
    assert!(profile.updated_at.is_some());
}

#[tokio::test]
async fn test_second_save_keeps_created_at() {
    require_emulator!();

    let store = UserProfileStore::new(Arc::new(test_db().await));
    let uid = unique_uid();

    store.save_user(&uid, name_fields("Alice")).await.unwrap();
    let first = store.get_user(&uid).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.save_user(&uid, name_fields("Bob")).await.unwrap();
    let second = store.get_user(&uid).await.unwrap().unwrap();

    assert_eq!(second.display_name.as_deref(), Some("Bob"));
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
}

// ═══════════════════════════════════════════════════════════════════════════
// COUPON LISTENER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_empty_coupon_collection_emits_snapshot() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    let mut subscription = db.watch_coupons(&uid).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(10), subscription.next())
        .await
        .expect("initial snapshot")
        .expect("stream open")
        .expect("no error");
    assert!(first.is_empty());

    subscription.close().await;
}
