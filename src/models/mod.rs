//! Value types shared across the crate.
//!
//! Connection descriptors for both database families plus statement
//! parameters and results.

pub mod document;
pub mod query;
pub mod relational;

pub use document::DocumentDescriptor;
pub use query::{Direction, ExecOutcome, QueryParam, placeholders};
pub use relational::{Dialect, RelationalDescriptor};
