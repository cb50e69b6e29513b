//! Shared helpers.
//!
//! Backoff builders and tracing bootstrap used by the library and binaries.

pub mod bootstrap;
pub mod retry;
