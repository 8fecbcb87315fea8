//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Cluster fixtures
//! - Mock backends
//! - Test database setup
//! - API test client

pub mod fixtures;
pub mod mocks;
pub mod test_app;

pub use fixtures::*;
pub use mocks::*;
pub use test_app::*;
