use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::debug;

use crate::backend::{BackendTransaction, FieldWrite, WriteFields, write_fields};
use crate::connection::ConnectionManager;
use crate::core::sanitize::sanitize_payload;
use crate::core::value::get_path;
use crate::core::{
    DbError, Document, ErrorCode, Fields, Result, Value, validate_collection,
    validate_document_id,
};
use crate::retry::RetryPolicy;

/// How many times an ABORTED commit is re-run before giving up.
///
/// Conflicts are not transient transport failures: the re-run is immediate,
/// with no backoff schedule.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// Compare-and-swap outcome. On a mismatch the stored value comes back and
/// nothing is written.
#[derive(Debug, Clone, PartialEq)]
pub struct CasOutcome {
    pub swapped: bool,
    pub current_value: Option<Value>,
}

/// Read-then-conditionally-write handle passed to transaction closures.
pub struct Transaction {
    tx: Box<dyn BackendTransaction>,
}

impl Transaction {
    pub async fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.tx.get(collection, id).await
    }

    /// Buffer a full-document write.
    pub fn set(&mut self, collection: &str, id: &str, data: Fields) {
        self.tx.set(collection, id, write_fields(data));
    }

    /// Buffer a field-path update.
    pub fn update(&mut self, collection: &str, id: &str, fields: WriteFields) {
        self.tx.update(collection, id, fields);
    }

    pub fn delete(&mut self, collection: &str, id: &str) {
        self.tx.delete(collection, id);
    }
}

/// Transactional primitives: each wraps one read-then-conditional-write
/// cycle; the store's optimistic-concurrency machinery resolves write
/// conflicts by re-running the cycle.
pub struct TransactionService {
    manager: Arc<ConnectionManager>,
    retry: RetryPolicy,
}

impl TransactionService {
    pub fn new(manager: Arc<ConnectionManager>, retry: RetryPolicy) -> Self {
        Self { manager, retry }
    }

    /// Run a closure inside a transaction.
    ///
    /// The closure may be invoked several times: an ABORTED commit re-runs
    /// the whole read-then-write cycle. Errors returned by the closure
    /// propagate immediately and nothing is written.
    pub async fn run_transaction<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'a> Fn(&'a mut Transaction) -> BoxFuture<'a, Result<T>> + Send + Sync,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let backend = self.manager.handle().await?;
            let tx = self
                .retry
                .run("transaction.begin", || {
                    let backend = Arc::clone(&backend);
                    async move { backend.begin_transaction().await }
                })
                .await?;
            let mut tx = Transaction { tx };

            let value = op(&mut tx).await?;

            match tx.tx.commit().await {
                Ok(()) => return Ok(value),
                Err(err)
                    if err.code() == Some(ErrorCode::Aborted)
                        && attempt < MAX_TRANSACTION_ATTEMPTS =>
                {
                    debug!(attempt, "Transaction aborted on conflict, re-running");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Atomically add `delta` to a numeric field; returns the new value.
    /// A missing field starts from zero.
    pub async fn atomic_increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        validate_field(field)?;

        self.run_transaction(|tx| {
            let collection = collection.to_string();
            let id = id.to_string();
            let field = field.to_string();
            Box::pin(async move {
                let doc = tx
                    .get(&collection, &id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &id))?;
                let current = numeric_field(&doc, &field)?;
                let next = current + delta;

                let mut fields = WriteFields::new();
                fields.insert(field, FieldWrite::Value(Value::Integer(next)));
                tx.update(&collection, &id, fields);
                Ok(next)
            })
        })
        .await
    }

    /// Atomically subtract `delta`, failing the transaction when the result
    /// would fall below `floor`. Nothing is written on failure.
    pub async fn atomic_decrement(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
        floor: i64,
    ) -> Result<i64> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        validate_field(field)?;

        self.run_transaction(|tx| {
            let collection = collection.to_string();
            let id = id.to_string();
            let field = field.to_string();
            Box::pin(async move {
                let doc = tx
                    .get(&collection, &id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &id))?;
                let current = numeric_field(&doc, &field)?;
                let next = current - delta;
                if next < floor {
                    return Err(DbError::Transaction(format!(
                        "Decrement of '{}' on '{}/{}' would fall below floor {} (current {}, delta {})",
                        field, collection, id, floor, current, delta
                    )));
                }

                let mut fields = WriteFields::new();
                fields.insert(field, FieldWrite::Value(Value::Integer(next)));
                tx.update(&collection, &id, fields);
                Ok(next)
            })
        })
        .await
    }

    /// Move `amount` from one document's field to another's.
    ///
    /// Fails without writing when the source holds less than `amount`; both
    /// sides are stamped with one shared timestamp on success.
    pub async fn atomic_transfer(
        &self,
        collection: &str,
        from_id: &str,
        to_id: &str,
        field: &str,
        amount: i64,
    ) -> Result<()> {
        validate_collection(collection)?;
        validate_document_id(from_id)?;
        validate_document_id(to_id)?;
        validate_field(field)?;
        if amount <= 0 {
            return Err(DbError::Validation(
                "Transfer amount must be positive".into(),
            ));
        }
        if from_id == to_id {
            return Err(DbError::Validation(
                "Transfer source and target must differ".into(),
            ));
        }

        self.run_transaction(|tx| {
            let collection = collection.to_string();
            let from_id = from_id.to_string();
            let to_id = to_id.to_string();
            let field = field.to_string();
            Box::pin(async move {
                let source = tx
                    .get(&collection, &from_id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &from_id))?;
                let target = tx
                    .get(&collection, &to_id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &to_id))?;

                let source_value = numeric_field(&source, &field)?;
                if source_value < amount {
                    return Err(DbError::Transaction(format!(
                        "Insufficient value in '{}/{}': {} < {}",
                        collection, from_id, source_value, amount
                    )));
                }
                let target_value = numeric_field(&target, &field)?;

                let now = Value::Timestamp(Utc::now());
                let mut source_write = WriteFields::new();
                source_write.insert(
                    field.clone(),
                    FieldWrite::Value(Value::Integer(source_value - amount)),
                );
                source_write.insert("updatedAt".to_string(), FieldWrite::Value(now.clone()));
                let mut target_write = WriteFields::new();
                target_write.insert(
                    field.clone(),
                    FieldWrite::Value(Value::Integer(target_value + amount)),
                );
                target_write.insert("updatedAt".to_string(), FieldWrite::Value(now));

                tx.update(&collection, &from_id, source_write);
                tx.update(&collection, &to_id, target_write);
                Ok(())
            })
        })
        .await
    }

    /// Apply `updates` only when every `(field, expected)` condition holds.
    /// Returns whether the write happened.
    pub async fn conditional_update(
        &self,
        collection: &str,
        id: &str,
        conditions: Vec<(String, Value)>,
        updates: Fields,
    ) -> Result<bool> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        sanitize_payload(&updates)?;

        self.run_transaction(|tx| {
            let collection = collection.to_string();
            let id = id.to_string();
            let conditions = conditions.clone();
            let updates = updates.clone();
            Box::pin(async move {
                let doc = tx
                    .get(&collection, &id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &id))?;

                let satisfied = conditions
                    .iter()
                    .all(|(field, expected)| doc.get(field) == Some(expected));
                if !satisfied {
                    return Ok(false);
                }

                tx.update(&collection, &id, write_fields(updates));
                Ok(true)
            })
        })
        .await
    }

    /// Read a document, apply a pure transformation, write the result back.
    /// Returns the fields as written.
    pub async fn read_modify_write<F>(
        &self,
        collection: &str,
        id: &str,
        modify: F,
    ) -> Result<Fields>
    where
        F: Fn(&Fields) -> Fields + Send + Sync + 'static,
    {
        validate_collection(collection)?;
        validate_document_id(id)?;

        let modify = Arc::new(modify);
        self.run_transaction(|tx| {
            let collection = collection.to_string();
            let id = id.to_string();
            let modify = Arc::clone(&modify);
            Box::pin(async move {
                let doc = tx
                    .get(&collection, &id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &id))?;

                let next = modify(&doc.fields);
                sanitize_payload(&next)?;
                tx.set(&collection, &id, next.clone());
                Ok(next)
            })
        })
        .await
    }

    /// Write `new_value` only when the stored field strictly equals
    /// `expected`. On mismatch the current value comes back unwritten.
    pub async fn compare_and_swap(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: Value,
        new_value: Value,
    ) -> Result<CasOutcome> {
        validate_collection(collection)?;
        validate_document_id(id)?;
        validate_field(field)?;

        self.run_transaction(|tx| {
            let collection = collection.to_string();
            let id = id.to_string();
            let field = field.to_string();
            let expected = expected.clone();
            let new_value = new_value.clone();
            Box::pin(async move {
                let doc = tx
                    .get(&collection, &id)
                    .await?
                    .ok_or_else(|| DbError::not_found(&collection, &id))?;

                let current = get_path(&doc.fields, &field).cloned().unwrap_or(Value::Null);
                if current != expected {
                    return Ok(CasOutcome {
                        swapped: false,
                        current_value: Some(current),
                    });
                }

                let mut fields = WriteFields::new();
                fields.insert(field, FieldWrite::Value(new_value));
                tx.update(&collection, &id, fields);
                Ok(CasOutcome {
                    swapped: true,
                    current_value: None,
                })
            })
        })
        .await
    }
}

fn validate_field(field: &str) -> Result<()> {
    if field.is_empty() {
        return Err(DbError::Validation("Field name cannot be empty".into()));
    }
    Ok(())
}

fn numeric_field(doc: &Document, field: &str) -> Result<i64> {
    match get_path(&doc.fields, field) {
        None => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| {
            DbError::Transaction(format!(
                "Field '{}' is {} and cannot be used numerically",
                field,
                value.type_name()
            ))
        }),
    }
}
