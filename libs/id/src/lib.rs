//! # vizzini-id
//!
//! Typed identifiers used across the vizzini workspace.
//!
//! ## ID Format
//!
//! Scheduler-owned resources use a prefixed ULID: `{prefix}_{ulid}`.
//!
//! - `pg_01HV4Z2WQXKJNM8GPQY6VBKC3D` (process guid)
//! - `cell_01HV4Z3MXNKPQR9HSTZ7WCLD4E` (cell)
//!
//! Instance guids are different: they are handed to the workload verbatim
//! as `INSTANCE_GUID`, so they render as a bare hyphenated UUID.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
