// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pipecraft Shared Types
//!
//! This crate contains types shared across the Pipecraft platform.

pub mod types;

pub use types::*;
