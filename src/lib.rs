// ============================================================================
// docbase: relational-document convenience layer over managed document stores
// ============================================================================

pub mod backend;
pub mod connection;
pub mod core;
pub mod facade;
pub mod registry;
pub mod retry;
pub mod services;

// Re-export main types for convenience
pub use crate::core::{
    BatchFailure, DbError, Document, ErrorCode, Fields, RelationalDocument, Result, Value,
};
pub use crate::facade::DocBase;
pub use crate::registry::{HealthReport, InstanceHealth, InstanceRegistry};
pub use crate::retry::{RetryConfig, RetryPolicy};

// Re-export the connection API
pub use crate::connection::{
    ConnectionManager, ConnectionMetrics, ConnectionState, Connector, Credentials, DocBaseConfig,
    ResolvedCredentials, ServiceAccount,
};

// Re-export the query building blocks
pub use crate::backend::{
    Cursor, CursorBound, Direction, DocumentBackend, FieldWrite, Filter, FilterOp, OrderBy,
    QuerySpec, WriteFields,
};

// Re-export service types callers handle directly
pub use crate::services::{
    BatchResult, CasOutcome, FindOrCreateOutcome, MigrationReport, Page, QueryOptions,
    ToggleOutcome, UpsertOutcome, ValidationReport,
};
