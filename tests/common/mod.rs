//! Common test utilities and helpers
//!
//! - Fixtures: generated CA, device CSRs and tampered CSRs
//! - Mock collaborators with call logs
//! - Test application harness

#![allow(dead_code)]

pub mod test_app;

pub use fixtures::*;
pub use mocks::*;
pub use test_app::*;
