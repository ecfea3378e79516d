//! Common test infrastructure shared across integration tests.
//!
//! This module provides:
//! - `gated_store`: a store whose calls can be held open to observe in-flight sessions
//! - `test_utils`: shared constants, game setup helpers, and event assertions
//!
//! # Usage
//!
//! From any integration test file:
//! ```ignore
//! mod common;
//! use common::test_utils::{id, Harness};
//! ```

pub mod test_utils;

// Re-export commonly used items for convenience.
// These are public utilities for integration tests - allow unused until tests adopt them.
#[allow(unused_imports)]
pub use test_utils::{game, id, init_tracing, start_session, Harness, TEST_TIMEOUT};

#[allow(unused_imports)]
pub use gated_store::GatedStore;
