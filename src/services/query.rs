use std::sync::Arc;

use crate::backend::{Cursor, CursorBound, Filter, FilterOp, OrderBy, QuerySpec};
use crate::connection::ConnectionManager;
use crate::core::value::get_path;
use crate::core::{DbError, Document, Result, Value, validate_collection};
use crate::retry::RetryPolicy;

/// Everything a single query can carry; translated verbatim into the
/// store's query builder.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub cursor: Option<Cursor>,
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Cursor for the next page; `None` when this page came back short.
    pub next_cursor: Option<Cursor>,
    pub has_more: bool,
}

/// Filtered, ordered and paginated reads.
pub struct QueryService {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl QueryService {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        Self { manager, retry }
    }

    /// Single-filter equality/comparison query.
    pub async fn query(
        &self,
        collection: &str,
        field: &str,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Result<Vec<Document>> {
        self.query_advanced(collection, vec![Filter::new(field, op, value.into())])
            .await
    }

    /// Multi-filter query; every filter must match.
    pub async fn query_advanced(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<Vec<Document>> {
        validate_collection(collection)?;
        let spec = QuerySpec::collection(collection).filters(filters);
        self.run(spec, "query_advanced").await
    }

    pub async fn query_ordered(
        &self,
        collection: &str,
        field: &str,
        op: FilterOp,
        value: impl Into<Value>,
        order: OrderBy,
    ) -> Result<Vec<Document>> {
        self.query_ordered_advanced(collection, vec![Filter::new(field, op, value.into())], vec![
            order,
        ])
        .await
    }

    pub async fn query_ordered_advanced(
        &self,
        collection: &str,
        filters: Vec<Filter>,
        order_by: Vec<OrderBy>,
    ) -> Result<Vec<Document>> {
        validate_collection(collection)?;
        if order_by.is_empty() {
            return Err(DbError::Query(
                "Ordered queries require at least one order-by field".into(),
            ));
        }
        let mut spec = QuerySpec::collection(collection).filters(filters);
        for order in order_by {
            spec = spec.order(order);
        }
        self.run(spec, "query_ordered").await
    }

    /// One page of results plus the cursor to continue from.
    pub async fn query_paginated(
        &self,
        collection: &str,
        field: &str,
        op: FilterOp,
        value: impl Into<Value>,
        order: OrderBy,
        page_size: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page> {
        self.query_paginated_advanced(
            collection,
            vec![Filter::new(field, op, value.into())],
            vec![order],
            page_size,
            cursor,
        )
        .await
    }

    pub async fn query_paginated_advanced(
        &self,
        collection: &str,
        filters: Vec<Filter>,
        order_by: Vec<OrderBy>,
        page_size: usize,
        cursor: Option<Cursor>,
    ) -> Result<Page> {
        validate_collection(collection)?;
        if order_by.is_empty() {
            return Err(DbError::Query(
                "Cursor pagination requires at least one order-by field".into(),
            ));
        }
        if page_size == 0 {
            return Err(DbError::Query("Page size must be > 0".into()));
        }

        let mut spec = QuerySpec::collection(collection)
            .filters(filters)
            .limit(page_size);
        for order in &order_by {
            spec = spec.order(order.clone());
        }
        if let Some(cursor) = cursor {
            spec = spec.cursor(cursor);
        }

        let documents = self.run(spec, "query_paginated").await?;
        let has_more = documents.len() == page_size;
        let next_cursor = if has_more {
            documents.last().map(|doc| Cursor {
                bound: CursorBound::StartAfter,
                values: order_by
                    .iter()
                    .map(|o| get_path(&doc.fields, &o.field).cloned().unwrap_or(Value::Null))
                    .collect(),
            })
        } else {
            None
        };

        Ok(Page {
            documents,
            next_cursor,
            has_more,
        })
    }

    pub async fn find_one_advanced(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<Option<Document>> {
        validate_collection(collection)?;
        let spec = QuerySpec::collection(collection).filters(filters).limit(1);
        let mut docs = self.run(spec, "find_one_advanced").await?;
        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.swap_remove(0))
        })
    }

    pub async fn count_where(
        &self,
        collection: &str,
        field: &str,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Result<u64> {
        self.count_where_advanced(collection, vec![Filter::new(field, op, value.into())])
            .await
    }

    pub async fn count_where_advanced(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<u64> {
        validate_collection(collection)?;
        let spec = QuerySpec::collection(collection).filters(filters);
        self.retry
            .run("count_where", || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.count(&spec).await
                }
            })
            .await
    }

    /// Fully general entry point: filters, ordering, limit, offset, cursor.
    pub async fn query_with_options(
        &self,
        collection: &str,
        options: QueryOptions,
    ) -> Result<Vec<Document>> {
        validate_collection(collection)?;
        if options.cursor.is_some() && options.order_by.is_empty() {
            return Err(DbError::Query(
                "Cursor pagination requires at least one order-by field".into(),
            ));
        }

        let mut spec = QuerySpec::collection(collection).filters(options.filters);
        for order in options.order_by {
            spec = spec.order(order);
        }
        if let Some(limit) = options.limit {
            spec = spec.limit(limit);
        }
        if let Some(offset) = options.offset {
            spec = spec.offset(offset);
        }
        if let Some(cursor) = options.cursor {
            spec = spec.cursor(cursor);
        }
        self.run(spec, "query_with_options").await
    }

    async fn run(&self, spec: QuerySpec, operation: &str) -> Result<Vec<Document>> {
        self.retry
            .run(operation, || {
                let spec = spec.clone();
                async move {
                    let backend = self.manager.handle().await?;
                    backend.run_query(&spec).await
                }
            })
            .await
    }
}
