//! Shared cucumber support code


pub use world::TestWorld;
