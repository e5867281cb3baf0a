/// Relational-document convention tests
///
/// Run with: cargo test --test relational_tests
use std::collections::BTreeMap;

use docbase::{DbError, Direction, DocBase, DocBaseConfig, Fields, ToggleOutcome, Value};

async fn db() -> DocBase {
    DocBase::connect(DocBaseConfig::default()).await.unwrap()
}

fn data(pairs: &[(&str, Value)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn refs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_relational_round_trip() {
    let db = db().await;

    let id = db
        .relational()
        .create_relational(
            "comments",
            data(&[("text", Value::from("hi"))]),
            refs(&[("postId", "p1")]),
        )
        .await
        .unwrap();

    let doc = db
        .relational()
        .read_relational("comments", &id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(doc.data.get("text"), Some(&Value::from("hi")));
    assert_eq!(doc.refs.get("postId"), Some(&"p1".to_string()));
    assert!(doc.created_at.is_some());
    assert!(doc.updated_at.is_some());
}

#[tokio::test]
async fn test_update_data_leaves_refs_untouched() {
    let db = db().await;
    let id = db
        .relational()
        .create_relational(
            "comments",
            data(&[("text", Value::from("hi")), ("likes", Value::Integer(0))]),
            refs(&[("postId", "p1"), ("userId", "u1")]),
        )
        .await
        .unwrap();

    let before = db
        .relational()
        .read_relational("comments", &id)
        .await
        .unwrap()
        .unwrap();

    db.relational()
        .update_data("comments", &id, data(&[("text", Value::from("edited"))]))
        .await
        .unwrap();

    let after = db
        .relational()
        .read_relational("comments", &id)
        .await
        .unwrap()
        .unwrap();

    // The edited field changed; sibling data, all refs, and createdAt did not.
    assert_eq!(after.data.get("text"), Some(&Value::from("edited")));
    assert_eq!(after.data.get("likes"), Some(&Value::Integer(0)));
    assert_eq!(after.refs.get("postId"), Some(&"p1".to_string()));
    assert_eq!(after.refs.get("userId"), Some(&"u1".to_string()));
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
}

#[tokio::test]
async fn test_update_refs_leaves_data_untouched() {
    let db = db().await;
    let id = db
        .relational()
        .create_relational(
            "comments",
            data(&[("text", Value::from("hi"))]),
            refs(&[("postId", "p1"), ("userId", "u1")]),
        )
        .await
        .unwrap();

    db.relational()
        .update_refs("comments", &id, refs(&[("postId", "p2")]))
        .await
        .unwrap();

    let doc = db
        .relational()
        .read_relational("comments", &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.refs.get("postId"), Some(&"p2".to_string()));
    assert_eq!(doc.refs.get("userId"), Some(&"u1".to_string()));
    assert_eq!(doc.data.get("text"), Some(&Value::from("hi")));
}

#[tokio::test]
async fn test_update_on_missing_document_fails_first() {
    let db = db().await;
    let result = db
        .relational()
        .update_data("comments", "ghost", data(&[("text", Value::from("x"))]))
        .await;
    assert!(matches!(result, Err(DbError::NotFound { .. })));
}

#[tokio::test]
async fn test_read_flattened_merges_data_and_refs() {
    let db = db().await;
    let id = db
        .relational()
        .create_relational(
            "comments",
            data(&[("text", Value::from("hi"))]),
            refs(&[("postId", "p1")]),
        )
        .await
        .unwrap();

    let flat = db
        .relational()
        .read_flattened("comments", &id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(flat.get("text"), Some(&Value::from("hi")));
    assert_eq!(flat.get("postId"), Some(&Value::from("p1")));
    assert_eq!(flat.get("id"), Some(&Value::Text(id)));
}

#[tokio::test]
async fn test_query_by_ref_and_variants() {
    let db = db().await;
    for (text, post, rank) in [("a", "p1", 3), ("b", "p1", 1), ("c", "p2", 2)] {
        db.relational()
            .create_relational(
                "comments",
                data(&[("text", Value::from(text)), ("rank", Value::Integer(rank))]),
                refs(&[("postId", post)]),
            )
            .await
            .unwrap();
    }

    let hits = db
        .relational()
        .query_by_ref("comments", "postId", "p1")
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);

    let limited = db
        .relational()
        .query_by_ref_limited("comments", "postId", "p1", 1)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let ordered = db
        .relational()
        .query_by_ref_ordered("comments", "postId", "p1", "rank", Direction::Ascending)
        .await
        .unwrap();
    let texts: Vec<&Value> = ordered
        .iter()
        .filter_map(|d| d.data.get("text"))
        .collect();
    assert_eq!(texts, vec![&Value::from("b"), &Value::from("a")]);
}

#[tokio::test]
async fn test_query_by_refs_matches_all() {
    let db = db().await;
    db.relational()
        .create_relational(
            "likes",
            Fields::new(),
            refs(&[("postId", "p1"), ("userId", "u1")]),
        )
        .await
        .unwrap();
    db.relational()
        .create_relational(
            "likes",
            Fields::new(),
            refs(&[("postId", "p1"), ("userId", "u2")]),
        )
        .await
        .unwrap();

    let hits = db
        .relational()
        .query_by_refs("likes", &refs(&[("postId", "p1"), ("userId", "u2")]))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].refs.get("userId"), Some(&"u2".to_string()));
}

#[tokio::test]
async fn test_toggle_alternates_created_deleted() {
    let db = db().await;
    let like = refs(&[("postId", "p1"), ("userId", "u1")]);

    let first = db
        .relational()
        .toggle_relation("likes", like.clone())
        .await
        .unwrap();
    let created_id = match first {
        ToggleOutcome::Created(id) => id,
        other => panic!("expected Created, got {:?}", other),
    };

    let second = db
        .relational()
        .toggle_relation("likes", like.clone())
        .await
        .unwrap();
    assert_eq!(second, ToggleOutcome::Deleted(created_id));

    // Third call starts the cycle again.
    let third = db
        .relational()
        .toggle_relation("likes", like)
        .await
        .unwrap();
    assert!(matches!(third, ToggleOutcome::Created(_)));
}

#[tokio::test]
async fn test_toggle_requires_exact_ref_set() {
    let db = db().await;

    // A superset of refs is a different relation and must not be toggled off.
    db.relational()
        .toggle_relation(
            "likes",
            refs(&[("postId", "p1"), ("userId", "u1"), ("orgId", "o1")]),
        )
        .await
        .unwrap();

    let outcome = db
        .relational()
        .toggle_relation("likes", refs(&[("postId", "p1"), ("userId", "u1")]))
        .await
        .unwrap();
    assert!(matches!(outcome, ToggleOutcome::Created(_)));
}

#[tokio::test]
async fn test_find_or_create_with_refs() {
    let db = db().await;
    let link = refs(&[("postId", "p1"), ("userId", "u1")]);

    let first = db
        .relational()
        .find_or_create_with_refs("follows", Fields::new(), link.clone())
        .await
        .unwrap();
    assert!(first.created);

    let second = db
        .relational()
        .find_or_create_with_refs("follows", Fields::new(), link)
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn test_upsert_with_refs_updates_existing() {
    let db = db().await;
    let link = refs(&[("postId", "p1"), ("userId", "u1")]);

    let first = db
        .relational()
        .upsert_with_refs(
            "bookmarks",
            data(&[("note", Value::from("v1"))]),
            link.clone(),
        )
        .await
        .unwrap();
    assert!(first.created);

    let second = db
        .relational()
        .upsert_with_refs("bookmarks", data(&[("note", Value::from("v2"))]), link)
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(first.id, second.id);

    let doc = db
        .relational()
        .read_relational("bookmarks", &second.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.data.get("note"), Some(&Value::from("v2")));
}

#[tokio::test]
async fn test_cascade_delete_relational() {
    let db = db().await;
    for user in ["u1", "u2", "u3"] {
        db.relational()
            .create_relational(
                "comments",
                Fields::new(),
                refs(&[("postId", "p1"), ("userId", user)]),
            )
            .await
            .unwrap();
    }
    db.relational()
        .create_relational(
            "comments",
            Fields::new(),
            refs(&[("postId", "p2"), ("userId", "u1")]),
        )
        .await
        .unwrap();

    let deleted = db
        .relational()
        .cascade_delete_relational("comments", "postId", "p1")
        .await
        .unwrap();
    assert_eq!(deleted, 3);

    let remaining = db
        .relational()
        .query_by_ref("comments", "postId", "p2")
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn test_batch_create_relational() {
    let db = db().await;
    let items: Vec<_> = (0..10)
        .map(|i| (data(&[("n", Value::Integer(i))]), refs(&[("postId", "p1")])))
        .collect();

    let ids = db
        .relational()
        .batch_create_relational("comments", items)
        .await
        .unwrap();
    assert_eq!(ids.len(), 10);

    let hits = db
        .relational()
        .query_by_ref("comments", "postId", "p1")
        .await
        .unwrap();
    assert_eq!(hits.len(), 10);
}

#[tokio::test]
async fn test_aggregate_count_by_parent() {
    let db = db().await;
    for (post, n) in [("p1", 3), ("p2", 1)] {
        for _ in 0..n {
            db.relational()
                .create_relational("comments", Fields::new(), refs(&[("postId", post)]))
                .await
                .unwrap();
        }
    }

    let counts = db
        .relational()
        .aggregate_count_by_parent("comments", "postId")
        .await
        .unwrap();
    assert_eq!(counts.get("p1"), Some(&3));
    assert_eq!(counts.get("p2"), Some(&1));
}

#[tokio::test]
async fn test_ref_validation() {
    let db = db().await;

    let empty_value = refs(&[("postId", "")]);
    assert!(matches!(
        db.relational()
            .create_relational("comments", Fields::new(), empty_value)
            .await,
        Err(DbError::Validation(_))
    ));

    let dotted_key = refs(&[("post.id", "p1")]);
    assert!(matches!(
        db.relational()
            .create_relational("comments", Fields::new(), dotted_key)
            .await,
        Err(DbError::Validation(_))
    ));
}
