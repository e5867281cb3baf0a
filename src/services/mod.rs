//! Operation services: six thin façades over the backend primitives.
//!
//! Structurally identical (validate identifiers, shape the payload, wrap
//! the store call in the retry policy, sanitize what comes back), differing
//! only in which primitive they delegate to.

pub mod batch;
pub mod crud;
pub mod migration;
pub mod query;
pub mod relational;
pub mod transaction;

pub use batch::{BatchResult, BatchService};
pub use crud::{CrudService, UpsertOutcome};
pub use migration::{MigrationReport, MigrationService, ValidationReport};
pub use query::{Page, QueryOptions, QueryService};
pub use relational::{FindOrCreateOutcome, RelationalService, ToggleOutcome};
pub use transaction::{CasOutcome, Transaction, TransactionService};
