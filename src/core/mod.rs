pub mod error;
pub mod sanitize;
pub mod types;
pub mod value;

pub use error::{BatchFailure, DbError, ErrorCode, Result};
pub use types::{Document, RelationalDocument, validate_collection, validate_document_id};
pub use value::{Fields, Value};
