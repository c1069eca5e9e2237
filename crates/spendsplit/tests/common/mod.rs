//! Shared test utilities for spendsplit integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against a temp-file database
//! - Builders for requests and scripted replies

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
