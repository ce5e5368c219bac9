//! Concurrency tests for the registry: races between deletes, refreshes and
//! admin kicks must never corrupt a row's state.

use serde_json::json;
use sqlx::SqlitePool;
use tokio::task::JoinSet;

use inklist_server::api::rest::types::SessionEntry;
use inklist_server::db::Store;
use inklist_server::db::models::RefreshFields;
use inklist_server::error::ApiError;

fn entry(id: &str) -> SessionEntry {
    SessionEntry {
        host: "203.0.113.7".to_string(),
        port: 27750,
        id: id.to_string(),
        protocol: "dp:4.21.2".to_string(),
        title: "race".to_string(),
        ..SessionEntry::default()
    }
}

#[sqlx::test]
async fn concurrent_deletes_succeed_exactly_once(pool: SqlitePool) {
    let store = Store::from_pool(pool, 10);
    let new_session = store.insert_session(&entry("alpha"), "203.0.113.7").await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let store = store.clone();
        let key = new_session.key.clone();
        let id = new_session.id;
        tasks.spawn(async move { store.delete_session(id, &key).await });
    }

    let mut deleted = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().unwrap() {
            deleted += 1;
        }
    }

    assert_eq!(deleted, 1, "exactly one delete must win");
}

#[sqlx::test]
async fn refresh_never_resurrects_a_kicked_session(pool: SqlitePool) {
    let store = Store::from_pool(pool, 10);
    let new_session = store.insert_session(&entry("alpha"), "203.0.113.7").await.unwrap();

    let mut tasks = JoinSet::new();

    {
        let store = store.clone();
        let id = new_session.id;
        tasks.spawn(async move {
            store
                .admin_update_sessions(&[id], true, "kicked")
                .await
                .map(|_| ())
        });
    }

    for _ in 0..8 {
        let store = store.clone();
        let key = new_session.key.clone();
        let id = new_session.id;
        tasks.spawn(async move {
            let fields = RefreshFields::from_map(
                json!({"users": 9}).as_object().unwrap(),
            );
            match store.refresh_session(&fields, id, &key).await {
                // Refreshes may win the race or lose it with the kick reason.
                Ok(()) | Err(ApiError::Refresh(_)) => Ok(()),
                Err(err) => Err(err),
            }
        });
    }

    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    // Whatever the interleaving, the kick sticks.
    let rows = store.admin_query_sessions().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].unlisted);
    assert_eq!(rows[0].unlist_reason, "kicked");
}

#[sqlx::test]
async fn concurrent_announces_share_the_pool(pool: SqlitePool) {
    let store = Store::from_pool(pool, 10);

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let store = store.clone();
        tasks.spawn(async move {
            store
                .insert_session(&entry(&format!("s{i}")), "203.0.113.7")
                .await
        });
    }

    let mut keys = std::collections::HashSet::new();
    while let Some(result) = tasks.join_next().await {
        let new_session = result.unwrap().unwrap();
        assert!(keys.insert(new_session.key), "update keys must be unique");
    }
    assert_eq!(keys.len(), 10);
}
