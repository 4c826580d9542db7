//! Shared test utilities for smartbatch integration tests.
//!
//! - `TestHarness`: temp directories plus engines wired to them
//! - builders for datasets, configs and test-only coherence rules

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
