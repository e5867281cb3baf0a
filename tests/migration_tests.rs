/// Migration helper tests
///
/// Run with: cargo test --test migration_tests
use docbase::{DbError, DocBase, DocBaseConfig, Fields, Value};

async fn db() -> DocBase {
    DocBase::connect(DocBaseConfig::default()).await.unwrap()
}

fn flat_comment(text: &str, post: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("text".into(), Value::from(text));
    fields.insert("postId".into(), Value::from(post));
    fields
}

#[tokio::test]
async fn test_convert_to_relational_partitions_by_key_list() {
    let db = db().await;
    db.crud()
        .set("comments", "c1", flat_comment("hi", "p1"), false)
        .await
        .unwrap();

    db.migration()
        .convert_to_relational("comments", "c1", &["postId".to_string()])
        .await
        .unwrap();

    let doc = db
        .relational()
        .read_relational("comments", "c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.data.get("text"), Some(&Value::from("hi")));
    assert!(!doc.data.contains_key("postId"));
    assert_eq!(doc.refs.get("postId"), Some(&"p1".to_string()));
    assert!(doc.created_at.is_some());
    assert!(doc.updated_at.is_some());
}

#[tokio::test]
async fn test_convert_missing_document_fails() {
    let db = db().await;
    let result = db
        .migration()
        .convert_to_relational("comments", "ghost", &[])
        .await;
    assert!(matches!(result, Err(DbError::NotFound { .. })));
}

#[tokio::test]
async fn test_batch_convert_continues_past_bad_documents() {
    let db = db().await;
    db.crud()
        .set("comments", "good", flat_comment("a", "p1"), false)
        .await
        .unwrap();

    // This document holds an integer under the ref key and cannot convert.
    let mut bad = Fields::new();
    bad.insert("postId".into(), Value::Integer(7));
    db.crud().set("comments", "bad", bad, false).await.unwrap();

    let report = db
        .migration()
        .batch_convert_to_relational("comments", &["postId".to_string()])
        .await
        .unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.migrated, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, "bad");

    let good = db
        .relational()
        .read_relational("comments", "good")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(good.refs.get("postId"), Some(&"p1".to_string()));
}

#[tokio::test]
async fn test_batch_transform() {
    let db = db().await;
    for i in 0..3 {
        let mut fields = Fields::new();
        fields.insert("n".into(), Value::Integer(i));
        db.crud()
            .set("nums", &format!("d{}", i), fields, false)
            .await
            .unwrap();
    }

    let report = db
        .migration()
        .batch_transform("nums", |doc| {
            let mut next = doc.fields.clone();
            let n = next.get("n").and_then(Value::as_i64).unwrap_or(0);
            next.insert("n".into(), Value::Integer(n * 10));
            Ok(next)
        })
        .await
        .unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.migrated, 3);

    let doc = db.crud().read("nums", "d2").await.unwrap().unwrap();
    assert_eq!(doc.get("n"), Some(&Value::Integer(20)));
}

#[tokio::test]
async fn test_add_field_to_all() {
    let db = db().await;
    for i in 0..3 {
        db.crud()
            .set("users", &format!("u{}", i), Fields::new(), false)
            .await
            .unwrap();
    }

    let report = db
        .migration()
        .add_field_to_all("users", "active", Value::Bool(true))
        .await
        .unwrap();
    assert_eq!(report.migrated, 3);

    let doc = db.crud().read("users", "u1").await.unwrap().unwrap();
    assert_eq!(doc.get("active"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_remove_field_from_all_skips_documents_without_it() {
    let db = db().await;
    let mut with_field = Fields::new();
    with_field.insert("legacy".into(), Value::Integer(1));
    with_field.insert("keep".into(), Value::Integer(2));
    db.crud()
        .set("users", "u1", with_field, false)
        .await
        .unwrap();
    db.crud()
        .set("users", "u2", Fields::new(), false)
        .await
        .unwrap();

    let report = db
        .migration()
        .remove_field_from_all("users", "legacy")
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.migrated, 1);

    let doc = db.crud().read("users", "u1").await.unwrap().unwrap();
    assert_eq!(doc.get("legacy"), None);
    assert_eq!(doc.get("keep"), Some(&Value::Integer(2)));
}

#[tokio::test]
async fn test_rename_field() {
    let db = db().await;
    let mut fields = Fields::new();
    fields.insert("username".into(), Value::from("alice"));
    db.crud().set("users", "u1", fields, false).await.unwrap();
    db.crud()
        .set("users", "u2", Fields::new(), false)
        .await
        .unwrap();

    let report = db
        .migration()
        .rename_field("users", "username", "handle")
        .await
        .unwrap();
    assert_eq!(report.migrated, 1);

    let doc = db.crud().read("users", "u1").await.unwrap().unwrap();
    assert_eq!(doc.get("username"), None);
    assert_eq!(doc.get("handle"), Some(&Value::from("alice")));
}

#[tokio::test]
async fn test_rename_field_rejects_same_name() {
    let db = db().await;
    let result = db.migration().rename_field("users", "a", "a").await;
    assert!(matches!(result, Err(DbError::Migration(_))));
}

#[tokio::test]
async fn test_copy_collection() {
    let db = db().await;
    for i in 0..4 {
        let mut fields = Fields::new();
        fields.insert("n".into(), Value::Integer(i));
        db.crud()
            .set("source", &format!("d{}", i), fields, false)
            .await
            .unwrap();
    }

    let report = db
        .migration()
        .copy_collection("source", "target")
        .await
        .unwrap();
    assert_eq!(report.scanned, 4);
    assert_eq!(report.migrated, 4);

    assert_eq!(db.crud().count("target").await.unwrap(), 4);
    let doc = db.crud().read("target", "d3").await.unwrap().unwrap();
    assert_eq!(doc.get("n"), Some(&Value::Integer(3)));

    // Source is untouched.
    assert_eq!(db.crud().count("source").await.unwrap(), 4);
}

#[tokio::test]
async fn test_copy_collection_rejects_same_name() {
    let db = db().await;
    let result = db.migration().copy_collection("users", "users").await;
    assert!(matches!(result, Err(DbError::Migration(_))));
}

#[tokio::test]
async fn test_validate_migration_is_read_only() {
    let db = db().await;
    db.crud()
        .set("comments", "ok", flat_comment("a", "p1"), false)
        .await
        .unwrap();
    let mut bad = Fields::new();
    bad.insert("text".into(), Value::from("b"));
    db.crud().set("comments", "bad", bad, false).await.unwrap();

    let report = db
        .migration()
        .validate_migration("comments", |doc| {
            let mut errors = Vec::new();
            if doc.get("postId").is_none() {
                errors.push("missing postId".to_string());
            }
            errors
        })
        .await
        .unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.valid, 1);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "bad");
    assert_eq!(report.errors[0].1, vec!["missing postId".to_string()]);

    // Nothing was mutated by the validation scan.
    let doc = db.crud().read("comments", "bad").await.unwrap().unwrap();
    assert_eq!(doc.get("text"), Some(&Value::from("b")));
}
