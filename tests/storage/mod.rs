//! Shared storage integration tests.
//!
//! Tests the EventStorage interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod event_storage_tests;
