//! Shared test infrastructure

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
