//! Shared test utilities for jobmill integration tests.
//!
//! - `TestHarness`: temporary on-disk database with seeding helpers
//! - fake strategies for driving job outcomes

pub mod harness;
pub mod strategies;

pub use harness::TestHarness;
pub use strategies::*;
