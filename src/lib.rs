//! Folio - publishing-of-record store
//!
//! Keeps the versioned editions of every content item, reserves the base
//! paths they are served at, and propagates committed changes to downstream
//! read stores stamped with an ordering token so late deliveries never win.

pub mod commands;
pub mod config;
pub mod downstream;
pub mod links;
pub mod model;
pub mod storage;
pub mod utils;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
