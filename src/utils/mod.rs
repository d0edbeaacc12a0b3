//! Shared helpers

pub mod error;
pub mod validation;
