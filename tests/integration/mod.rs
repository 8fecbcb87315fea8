//! Integration tests for the OSD remove controller
//!
//! These tests drive the API with a real (in-memory) task store and the
//! reconciler against mock cluster backends.

mod api_tests;
mod disk_daemon_tests;
mod reconcile_tests;
