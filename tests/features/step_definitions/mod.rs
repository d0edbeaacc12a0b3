//! Step definitions for Cucumber scenarios

pub mod lifecycle_steps;
