/// Query service tests
///
/// Run with: cargo test --test query_tests
use docbase::{
    Cursor, CursorBound, DbError, DocBase, DocBaseConfig, Fields, Filter, FilterOp, OrderBy,
    QueryOptions, Value,
};

async fn seeded_db() -> DocBase {
    let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();
    for (id, name, age, tags) in [
        ("u1", "Alice", 30, vec!["admin", "dev"]),
        ("u2", "Bob", 25, vec!["dev"]),
        ("u3", "Carol", 35, vec!["ops"]),
        ("u4", "Dave", 25, vec![]),
    ] {
        let mut fields = Fields::new();
        fields.insert("name".into(), Value::from(name));
        fields.insert("age".into(), Value::Integer(age));
        fields.insert(
            "tags".into(),
            Value::Array(tags.into_iter().map(Value::from).collect()),
        );
        db.crud().set("users", id, fields, false).await.unwrap();
    }
    db
}

#[tokio::test]
async fn test_comparison_operators() {
    let db = seeded_db().await;
    let q = db.query();

    assert_eq!(
        q.query("users", "age", FilterOp::Eq, 25i64)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        q.query("users", "age", FilterOp::Ne, 25i64)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        q.query("users", "age", FilterOp::Gt, 25i64)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        q.query("users", "age", FilterOp::Gte, 25i64)
            .await
            .unwrap()
            .len(),
        4
    );
    assert_eq!(
        q.query("users", "age", FilterOp::Lt, 30i64)
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        q.query("users", "age", FilterOp::Lte, 30i64)
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn test_in_and_array_operators() {
    let db = seeded_db().await;
    let q = db.query();

    let in_hits = q
        .query(
            "users",
            "name",
            FilterOp::In,
            Value::Array(vec![Value::from("Alice"), Value::from("Bob")]),
        )
        .await
        .unwrap();
    assert_eq!(in_hits.len(), 2);

    let contains = q
        .query("users", "tags", FilterOp::ArrayContains, "dev")
        .await
        .unwrap();
    assert_eq!(contains.len(), 2);

    let any = q
        .query(
            "users",
            "tags",
            FilterOp::ArrayContainsAny,
            Value::Array(vec![Value::from("admin"), Value::from("ops")]),
        )
        .await
        .unwrap();
    assert_eq!(any.len(), 2);
}

#[tokio::test]
async fn test_query_advanced_combines_filters() {
    let db = seeded_db().await;

    let hits = db
        .query()
        .query_advanced(
            "users",
            vec![
                Filter::new("age", FilterOp::Gte, 25i64),
                Filter::new("age", FilterOp::Lt, 35i64),
                Filter::new("name", FilterOp::Ne, "Bob"),
            ],
        )
        .await
        .unwrap();

    let names: Vec<&Value> = hits.iter().filter_map(|d| d.get("name")).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&&Value::from("Alice")));
    assert!(names.contains(&&Value::from("Dave")));
}

#[tokio::test]
async fn test_query_ordered() {
    let db = seeded_db().await;

    let hits = db
        .query()
        .query_ordered("users", "age", FilterOp::Gte, 25i64, OrderBy::desc("age"))
        .await
        .unwrap();

    let ages: Vec<i64> = hits
        .iter()
        .filter_map(|d| d.get("age").and_then(Value::as_i64))
        .collect();
    assert_eq!(ages, vec![35, 30, 25, 25]);
}

#[tokio::test]
async fn test_ordered_requires_order_by() {
    let db = seeded_db().await;
    let result = db
        .query()
        .query_ordered_advanced("users", Vec::new(), Vec::new())
        .await;
    assert!(matches!(result, Err(DbError::Query(_))));
}

#[tokio::test]
async fn test_pagination_walks_all_pages() {
    let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();
    for i in 0..7 {
        let mut fields = Fields::new();
        fields.insert("n".into(), Value::Integer(i));
        db.crud()
            .set("nums", &format!("d{}", i), fields, false)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<Cursor> = None;
    loop {
        let page = db
            .query()
            .query_paginated(
                "nums",
                "n",
                FilterOp::Gte,
                0i64,
                OrderBy::asc("n"),
                3,
                cursor.take(),
            )
            .await
            .unwrap();

        for doc in &page.documents {
            seen.push(doc.get("n").and_then(Value::as_i64).unwrap());
        }
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_pagination_validation() {
    let db = seeded_db().await;

    let no_order = db
        .query()
        .query_paginated_advanced("users", Vec::new(), Vec::new(), 3, None)
        .await;
    assert!(matches!(no_order, Err(DbError::Query(_))));

    let zero_page = db
        .query()
        .query_paginated_advanced("users", Vec::new(), vec![OrderBy::asc("age")], 0, None)
        .await;
    assert!(matches!(zero_page, Err(DbError::Query(_))));
}

#[tokio::test]
async fn test_find_one_advanced() {
    let db = seeded_db().await;

    let doc = db
        .query()
        .find_one_advanced(
            "users",
            vec![
                Filter::new("age", FilterOp::Eq, 25i64),
                Filter::new("name", FilterOp::Eq, "Dave"),
            ],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.id, "u4");
}

#[tokio::test]
async fn test_count_where() {
    let db = seeded_db().await;

    assert_eq!(
        db.query()
            .count_where("users", "age", FilterOp::Eq, 25i64)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        db.query()
            .count_where_advanced(
                "users",
                vec![
                    Filter::new("age", FilterOp::Gte, 25i64),
                    Filter::new("age", FilterOp::Lte, 30i64),
                ],
            )
            .await
            .unwrap(),
        3
    );
}

#[tokio::test]
async fn test_query_with_options() {
    let db = seeded_db().await;

    let docs = db
        .query()
        .query_with_options(
            "users",
            QueryOptions {
                filters: vec![Filter::new("age", FilterOp::Gte, 25i64)],
                order_by: vec![OrderBy::asc("age"), OrderBy::asc("name")],
                limit: Some(2),
                offset: Some(1),
                cursor: None,
            },
        )
        .await
        .unwrap();

    let names: Vec<&Value> = docs.iter().filter_map(|d| d.get("name")).collect();
    assert_eq!(names, vec![&Value::from("Dave"), &Value::from("Alice")]);
}

#[tokio::test]
async fn test_query_with_options_cursor_needs_order() {
    let db = seeded_db().await;

    let result = db
        .query()
        .query_with_options(
            "users",
            QueryOptions {
                cursor: Some(Cursor {
                    bound: CursorBound::StartAfter,
                    values: vec![Value::Integer(25)],
                }),
                ..QueryOptions::default()
            },
        )
        .await;
    assert!(matches!(result, Err(DbError::Query(_))));
}

#[tokio::test]
async fn test_dotted_field_path_filters() {
    let db = DocBase::connect(DocBaseConfig::default()).await.unwrap();
    let mut nested = Fields::new();
    nested.insert("city".into(), Value::from("Berlin"));
    let mut fields = Fields::new();
    fields.insert("address".into(), Value::Map(nested));
    db.crud().set("users", "u1", fields, false).await.unwrap();

    let hits = db
        .query()
        .query("users", "address.city", FilterOp::Eq, "Berlin")
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}
