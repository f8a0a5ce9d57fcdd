//! Error handling framework for the authorization core.
//!
//! Every failure in the system is expressed as an [`Error`] carrying one of
//! the stable [`ErrorCode`]s of the public error taxonomy, a human-readable
//! message, and an [`ErrorContext`] (error id, request id, metadata, trace).
//!
//! Two rules the rest of the workspace relies on:
//!
//! - A deny decision is **not** an error. `check` returns
//!   `CheckResult { is_allowed: false }`; errors are reserved for validation
//!   failures, conflicts, outages and timeouts.
//! - Cache failures degrade. They are recorded via [`ErrorMetrics`] and the
//!   caller falls through to the database; a cache outage never fails a
//!   check on its own.

pub mod codes;
pub mod context;
pub mod framework;
pub mod metrics;

pub use codes::ErrorCode;
pub use context::ErrorContext;
pub use framework::{Error, ErrorSeverity, Result};
pub use metrics::ErrorMetrics;
