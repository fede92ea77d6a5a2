//! Unit tests for the environ agent.
//!
//! These tests work on temporary env files and mocked command runners; no
//! Valkey server is needed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod exec_tests;
mod inbox_tests;
mod mocks;
