//! Projector tests against the in-memory read-model stores.

#![allow(clippy::expect_used)] // Test code uses expect for clear failure messages

use conveyor_core::read_model::{ProjectionError, ReadModelDocument, ReadModelStore};
use conveyor_projections::ReadModelProjector;
use conveyor_testing::{FailingReadModelStore, InMemoryReadModelStore};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct OrderView {
    status: &'static str,
    total_cents: i64,
}

fn order_doc(aggregate_id: &str, version: i64, status: &'static str) -> ReadModelDocument {
    ReadModelDocument::from_state(
        "order",
        aggregate_id,
        version,
        &OrderView {
            status,
            total_cents: 1299,
        },
    )
    .expect("serialization should succeed")
}

#[tokio::test]
async fn awaited_projection_is_visible_after_wait() {
    let store = InMemoryReadModelStore::new();
    let projector = ReadModelProjector::new(store.clone());

    projector
        .project(order_doc("order-1", 1, "placed"))
        .wait()
        .await
        .expect("projection should succeed");

    let doc = store
        .get("order-1")
        .await
        .expect("get should succeed")
        .expect("document should exist");
    assert_eq!(doc.version, 1);
    assert_eq!(doc.document["status"], "placed");
}

#[tokio::test]
async fn later_projection_overwrites_earlier_document() {
    let store = InMemoryReadModelStore::new();
    let projector = ReadModelProjector::new(store.clone());

    projector
        .project(order_doc("order-2", 1, "placed"))
        .wait()
        .await
        .expect("projection should succeed");
    projector
        .project(order_doc("order-2", 2, "paid"))
        .wait()
        .await
        .expect("projection should succeed");

    let doc = store
        .get("order-2")
        .await
        .expect("get should succeed")
        .expect("document should exist");
    assert_eq!(doc.version, 2);
    assert_eq!(doc.document["status"], "paid");
    assert_eq!(store.len(), 1, "One document per aggregate");
}

#[tokio::test]
async fn detached_projection_completes_in_background() {
    let store = InMemoryReadModelStore::new();
    let projector = ReadModelProjector::new(store.clone());

    projector
        .project(order_doc("order-3", 1, "placed"))
        .detach();

    // The task keeps running after detach; poll briefly for the document
    let mut visible = false;
    for _ in 0..50 {
        if store.exists("order-3").await.expect("exists should succeed") {
            visible = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(visible, "Detached projection never became visible");
}

#[tokio::test]
async fn awaited_projection_surfaces_storage_failure() {
    let projector = ReadModelProjector::new(FailingReadModelStore::new());

    let result = projector.project(order_doc("order-4", 1, "placed")).wait().await;

    assert!(
        matches!(result, Err(ProjectionError::Storage(_))),
        "Awaited projection should surface the storage error, got: {result:?}"
    );
}

#[tokio::test]
async fn awaited_projection_succeeds_on_retry_after_recovery() {
    let store = InMemoryReadModelStore::new();
    let projector = ReadModelProjector::new(store.clone());
    store.fail_next_upserts(1);

    // The caller sees the failure before committing its own transaction
    // and retries the whole use case once the store recovers
    let first = projector.project(order_doc("order-6", 1, "placed")).wait().await;
    assert!(matches!(first, Err(ProjectionError::Storage(_))));
    assert!(!store.exists("order-6").await.expect("exists should succeed"));

    projector
        .project(order_doc("order-6", 1, "placed"))
        .wait()
        .await
        .expect("retry should succeed after recovery");

    let doc = store
        .get("order-6")
        .await
        .expect("get should succeed")
        .expect("document should exist");
    assert_eq!(doc.document["status"], "placed");
}

#[tokio::test]
async fn tombstone_removes_document() {
    let store = InMemoryReadModelStore::new();
    let projector = ReadModelProjector::new(store.clone());

    projector
        .project(order_doc("order-5", 1, "placed"))
        .wait()
        .await
        .expect("projection should succeed");
    projector
        .tombstone("order-5")
        .wait()
        .await
        .expect("tombstone should succeed");

    assert!(!store.exists("order-5").await.expect("exists should succeed"));

    // Tombstoning an absent document is not an error
    projector
        .tombstone("order-5")
        .wait()
        .await
        .expect("tombstone should be a no-op");
}
