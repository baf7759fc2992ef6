//! Configuration, shared value types, and the error model.

pub mod config;
pub mod errors;
pub mod types;
