//! Result cache behavior through a session

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{session, ScriptedLink};
use pged::Record;

fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn cached_record_skips_the_resolver() {
    let link = ScriptedLink::new();
    let session = session(&link);
    let users = session.cache("user");
    let calls = AtomicU32::new(0);

    users.set(json!({"id": 1, "name": "A"})).await.unwrap();

    let found = users
        .get_or_resolve(&json!({"id": 1}), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .await
        .unwrap();

    assert_eq!(found, Some(record(json!({"id": 1, "name": "A"}))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(users.hits(), 1);
    assert_eq!(session.cache_hits(), 1);
}

#[tokio::test]
async fn miss_resolves_once_and_stores() {
    let link = ScriptedLink::new();
    let session = session(&link);
    let users = session.cache("user");
    let calls = AtomicU32::new(0);

    for _ in 0..2 {
        let found = users
            .get_or_resolve(&json!({"id": 2}), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(record(json!({"id": 2, "name": "B"}))))
            })
            .await
            .unwrap();
        assert_eq!(found.unwrap()["name"], json!("B"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(users.len().await, 1);
    assert_eq!(users.hits(), 1);
}

#[tokio::test]
async fn empty_resolution_is_not_stored() {
    let link = ScriptedLink::new();
    let session = session(&link);
    let users = session.cache("user");

    let found = users
        .get_or_resolve(&json!({"id": 3}), || async { Ok(Some(Record::new())) })
        .await
        .unwrap();

    assert_eq!(found, Some(Record::new()));
    assert!(users.is_empty().await);
}

#[tokio::test]
async fn concurrent_misses_resolve_once() {
    let link = ScriptedLink::new();
    let session = session(&link);
    let users = session.cache("user");
    let calls = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let users = users.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                users
                    .get_or_resolve(&json!({"id": 7}), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(Some(record(json!({"id": 7}))))
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.expect("task panicked").is_some());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(users.hits(), 4);
}

#[tokio::test]
async fn resolver_can_query_the_database() {
    let link = ScriptedLink::new();
    link.respond("FROM users", json!([{"id": 3, "first_name": "Cy"}]));
    let session = session(&link);
    let users = session.cache("user");

    let found = users
        .get_or_resolve(&json!({"id": 3}), || async {
            Ok(session
                .from("users")
                .filter(json!({"id": 3}))
                .first()
                .execute()
                .await?
                .into_row())
        })
        .await
        .unwrap();
    assert_eq!(found.unwrap()["firstName"], json!("Cy"));

    users.get(&json!({"id": 3})).await.unwrap();
    assert_eq!(link.statements().len(), 1);
}

#[tokio::test]
async fn caches_are_per_entity_and_share_the_session_counter() {
    let link = ScriptedLink::new();
    let session = session(&link);

    session.cache("user").set(json!([{"id": 1}])).await.unwrap();
    session.cache("team").set(json!({"items": [{"id": 1}], "total": 1})).await.unwrap();

    assert!(session.cache("user").get(&json!({"id": 1})).await.unwrap().is_some());
    assert!(session.cache("team").get(&json!({"id": 1})).await.unwrap().is_some());
    assert!(session.cache("order").get(&json!({"id": 1})).await.unwrap().is_none());

    assert_eq!(session.cache("user").hits(), 1);
    assert_eq!(session.cache_hits(), 2);
}

#[tokio::test]
async fn update_and_invalidate() {
    let link = ScriptedLink::new();
    let session = session(&link);
    let users = session.cache("user");

    users
        .set(json!([{"id": 1, "name": "A"}, {"id": 2, "name": "B"}]))
        .await
        .unwrap();

    users
        .update(&json!({"id": 1}), json!({"id": 1, "name": "A2"}))
        .await
        .unwrap();
    assert_eq!(
        users.get(&json!({"id": 1})).await.unwrap().unwrap()["name"],
        json!("A2")
    );

    users
        .patch(&json!({"id": 2}), &json!({"name": "B2"}))
        .await
        .unwrap();
    assert_eq!(
        users.get(&json!({"id": 2})).await.unwrap().unwrap()["name"],
        json!("B2")
    );

    assert_eq!(users.invalidate(&json!({"id": 1})).await.unwrap(), 1);
    assert!(users.get(&json!({"id": 1})).await.unwrap().is_none());
}

#[tokio::test]
async fn rejects_malformed_values() {
    let link = ScriptedLink::new();
    let session = session(&link);
    let users = session.cache("user");

    assert!(users.set(json!("nope")).await.is_err());
    assert!(users.get(&json!([1])).await.is_err());
    assert!(users.is_empty().await);
}
