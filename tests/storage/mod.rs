//! Shared storage integration tests.
//!
//! Tests the PublishingStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod publishing_store_tests;
