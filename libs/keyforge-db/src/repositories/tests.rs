//! Storage layer tests on an in-memory database.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use super::{KeyRepository, ServerRepository, TariffRepository, UserRepository};
use crate::db::connect_memory;
use crate::error::StoreError;
use crate::models::ServerStatus;

async fn test_pool() -> SqlitePool {
    connect_memory().await.unwrap()
}

// === User tests ===

#[tokio::test]
async fn ensure_user_is_idempotent() {
    let users = UserRepository::new(test_pool().await);
    users.ensure(100).await.unwrap();
    users.ensure(100).await.unwrap();

    let user = users.get(100).await.unwrap().unwrap();
    assert_eq!(user.user_id, 100);
    assert_eq!(user.balance, 0);
    assert_eq!(user.earned, 0);
    assert_eq!(user.referrer_id, None);

    assert!(users.get(999).await.unwrap().is_none());
}

#[tokio::test]
async fn referrer_link_overwrites_previous() {
    let users = UserRepository::new(test_pool().await);
    for id in [1, 2, 3] {
        users.ensure(id).await.unwrap();
    }

    users.set_referrer(1, 2).await.unwrap();
    assert_eq!(users.referrer_of(1).await.unwrap(), Some(2));

    users.set_referrer(1, 3).await.unwrap();
    assert_eq!(users.referrer_of(1).await.unwrap(), Some(3));

    assert_eq!(users.referrer_of(2).await.unwrap(), None);
}

#[tokio::test]
async fn set_referrer_requires_existing_user() {
    let users = UserRepository::new(test_pool().await);
    let err = users.set_referrer(42, 1).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn earnings_accumulate_and_settle_once() {
    let users = UserRepository::new(test_pool().await);
    users.ensure(7).await.unwrap();
    users.add_earned(7, 9000).await.unwrap();
    users.add_earned(7, 4500).await.unwrap();

    let user = users.get(7).await.unwrap().unwrap();
    assert_eq!(user.earned, 13500);
    assert_eq!(user.balance, 0);

    assert_eq!(users.settle_earned(7).await.unwrap(), 1);
    let user = users.get(7).await.unwrap().unwrap();
    assert_eq!(user.earned, 0);
    assert_eq!(user.balance, 13500);

    // Nothing left to move.
    assert_eq!(users.settle_earned(7).await.unwrap(), 0);
}

#[tokio::test]
async fn add_earned_requires_existing_user() {
    let users = UserRepository::new(test_pool().await);
    let err = users.add_earned(42, 100).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

// === Key tests ===

#[tokio::test]
async fn issued_keys_are_listed_per_user() {
    let keys = KeyRepository::new(test_pool().await);
    let expires = Utc::now() + Duration::days(30);
    keys.insert(1, "key-a", expires, 1).await.unwrap();
    keys.insert(1, "key-b", expires, 1).await.unwrap();
    keys.insert(2, "key-c", expires, 1).await.unwrap();

    let mine = keys.list_for_user(1).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].key, "key-a");
    assert_eq!(mine[1].key, "key-b");

    assert_eq!(keys.list_all().await.unwrap().len(), 3);
}

#[tokio::test]
async fn duplicate_key_string_is_a_conflict() {
    let keys = KeyRepository::new(test_pool().await);
    let expires = Utc::now() + Duration::days(30);
    keys.insert(1, "key-a", expires, 1).await.unwrap();

    let err = keys.insert(2, "key-a", expires, 1).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));
}

#[tokio::test]
async fn has_any_counts_expired_keys() {
    let keys = KeyRepository::new(test_pool().await);
    assert!(!keys.has_any(5).await.unwrap());

    let expired = Utc::now() - Duration::days(3);
    keys.insert(5, "key-old", expired, 1).await.unwrap();
    assert!(keys.has_any(5).await.unwrap());
}

#[tokio::test]
async fn revocation_only_touches_target_user() {
    let keys = KeyRepository::new(test_pool().await);
    let expires = Utc::now() + Duration::days(30);
    keys.insert(1, "key-a", expires, 1).await.unwrap();
    keys.insert(1, "key-b", expires, 2).await.unwrap();
    keys.insert(2, "key-c", expires, 1).await.unwrap();

    assert_eq!(keys.revoke_all_for_user(1).await.unwrap(), 2);
    assert!(keys.list_for_user(1).await.unwrap().is_empty());
    assert_eq!(keys.list_for_user(2).await.unwrap().len(), 1);

    assert_eq!(keys.revoke_all_for_user(1).await.unwrap(), 0);
}

// === Server tests ===

#[tokio::test]
async fn server_registry_round_trip() {
    let servers = ServerRepository::new(test_pool().await);
    let first = servers.add("10.0.0.1", 443, "vless").await.unwrap();
    let second = servers.add("10.0.0.2", 8443, "vless").await.unwrap();

    let err = servers.add("10.0.0.1", 80, "wireguard").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));

    let server = servers.get(first).await.unwrap().unwrap();
    assert_eq!(server.address, "10.0.0.1");
    assert_eq!(server.port, 443);
    assert!(server.is_active());

    servers.set_status(second, ServerStatus::Inactive).await.unwrap();
    let active = servers.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first);
    assert_eq!(servers.list().await.unwrap().len(), 2);

    let err = servers.set_status(999, ServerStatus::Active).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn least_loaded_prefers_fewest_keys_then_lowest_id() {
    let pool = test_pool().await;
    let servers = ServerRepository::new(pool.clone());
    let keys = KeyRepository::new(pool);

    assert_eq!(servers.least_loaded().await.unwrap(), None);

    let s1 = servers.add("10.0.0.1", 443, "vless").await.unwrap();
    let s2 = servers.add("10.0.0.2", 443, "vless").await.unwrap();
    let s3 = servers.add("10.0.0.3", 443, "vless").await.unwrap();

    // All empty: lowest id wins the tie.
    assert_eq!(servers.least_loaded().await.unwrap(), Some(s1));

    let expires = Utc::now() + Duration::days(30);
    keys.insert(1, "key-a", expires, s1).await.unwrap();
    keys.insert(2, "key-b", expires, s1).await.unwrap();
    keys.insert(3, "key-c", expires, s1).await.unwrap();
    keys.insert(4, "key-d", expires, s2).await.unwrap();
    keys.insert(5, "key-e", expires, s3).await.unwrap();

    // Loads are 3/1/1: s2 ties with s3 and has the lower id.
    assert_eq!(servers.least_loaded().await.unwrap(), Some(s2));
}

#[tokio::test]
async fn least_loaded_counts_expired_keys() {
    let pool = test_pool().await;
    let servers = ServerRepository::new(pool.clone());
    let keys = KeyRepository::new(pool);

    let s1 = servers.add("10.0.0.1", 443, "vless").await.unwrap();
    let s2 = servers.add("10.0.0.2", 443, "vless").await.unwrap();

    let expired = Utc::now() - Duration::days(10);
    keys.insert(1, "key-old", expired, s1).await.unwrap();

    assert_eq!(servers.least_loaded().await.unwrap(), Some(s2));
}

#[tokio::test]
async fn inactive_servers_are_never_selected() {
    let servers = ServerRepository::new(test_pool().await);
    let s1 = servers.add("10.0.0.1", 443, "vless").await.unwrap();
    let s2 = servers.add("10.0.0.2", 443, "vless").await.unwrap();

    servers.set_status(s2, ServerStatus::Inactive).await.unwrap();
    assert_eq!(servers.least_loaded().await.unwrap(), Some(s1));

    servers.set_status(s1, ServerStatus::Inactive).await.unwrap();
    assert_eq!(servers.least_loaded().await.unwrap(), None);
}

// === Tariff tests ===

#[tokio::test]
async fn seeded_tariffs_are_present() {
    let tariffs = TariffRepository::new(test_pool().await);

    let all = tariffs.list().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].name, "1_month");
    assert_eq!(all[0].amount, 30000);
    assert_eq!(all[0].duration_days, 30);
    assert_eq!(all[1].name, "3_months");
    assert_eq!(all[1].duration_days, 90);
    assert_eq!(all[2].name, "6_months");
    assert_eq!(all[2].amount, 150000);

    assert!(tariffs.get("1_month").await.unwrap().is_some());
    assert!(tariffs.get("weekly").await.unwrap().is_none());
}

#[tokio::test]
async fn price_updates_apply_to_known_tariffs_only() {
    let tariffs = TariffRepository::new(test_pool().await);

    tariffs.set_amount("1_month", 35000).await.unwrap();
    assert_eq!(tariffs.get("1_month").await.unwrap().unwrap().amount, 35000);

    let err = tariffs.set_amount("gold", 100).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

// === Count tests ===

#[tokio::test]
async fn counts_reflect_rows() {
    let pool = test_pool().await;
    let users = UserRepository::new(pool.clone());
    let keys = KeyRepository::new(pool);

    users.ensure(1).await.unwrap();
    users.ensure(2).await.unwrap();
    let expires = Utc::now() + Duration::days(1);
    keys.insert(1, "key-a", expires, 1).await.unwrap();
    keys.insert(1, "key-b", expires, 1).await.unwrap();
    keys.insert(2, "key-c", expires, 1).await.unwrap();

    assert_eq!(users.count().await.unwrap(), 2);
    assert_eq!(keys.count().await.unwrap(), 3);
    assert_eq!(users.all_user_ids().await.unwrap(), vec![1, 2]);
    assert_eq!(users.count_referrals(1).await.unwrap(), 0);
}
