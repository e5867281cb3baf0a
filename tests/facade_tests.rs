/// Facade tests
///
/// Run with: cargo test --test facade_tests
use std::sync::Arc;

use docbase::backend::memory::MemoryConnector;
use docbase::{DocBase, DocBaseConfig, Fields, Value};

#[tokio::test]
async fn test_services_are_cached() {
    let db = DocBase::new(DocBaseConfig::default()).unwrap();

    assert!(Arc::ptr_eq(&db.crud(), &db.crud()));
    assert!(Arc::ptr_eq(&db.relational(), &db.relational()));
    assert!(Arc::ptr_eq(&db.query(), &db.query()));
    assert!(Arc::ptr_eq(&db.batch(), &db.batch()));
    assert!(Arc::ptr_eq(&db.transactions(), &db.transactions()));
    assert!(Arc::ptr_eq(&db.migration(), &db.migration()));
}

#[tokio::test]
async fn test_lazy_construction_opens_no_connection() {
    let db = DocBase::new(DocBaseConfig::default()).unwrap();
    assert!(!db.is_connected().await);

    // First real operation connects.
    db.crud()
        .set("users", "u1", Fields::new(), false)
        .await
        .unwrap();
    assert!(db.is_connected().await);
}

#[tokio::test]
async fn test_services_share_one_connection() {
    let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();

    let mut fields = Fields::new();
    fields.insert("name".into(), Value::from("Alice"));
    let id = db.crud().create("users", fields).await.unwrap();

    // The query service sees the document the CRUD service wrote.
    let hits = db
        .query()
        .query("users", "name", docbase::FilterOp::Eq, "Alice")
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
}

#[tokio::test]
async fn test_metrics_track_operations() {
    let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();
    assert_eq!(db.metrics().await.operation_count, 0);

    db.crud()
        .set("users", "u1", Fields::new(), false)
        .await
        .unwrap();
    assert!(db.metrics().await.operation_count > 0);
}

#[tokio::test]
async fn test_close_and_reconnect() {
    let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();
    db.close().await;
    assert!(!db.is_connected().await);

    // The next operation reconnects transparently.
    db.crud()
        .set("users", "u1", Fields::new(), false)
        .await
        .unwrap();
    assert!(db.is_connected().await);
}

#[tokio::test]
async fn test_connect_with_explicit_connector() {
    let db = DocBase::connect_with(DocBaseConfig::default(), Arc::new(MemoryConnector))
        .await
        .unwrap();
    assert!(db.is_connected().await);
}
