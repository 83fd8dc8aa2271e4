//! COINFLIP: fair-coin wagering simulator
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod engine;
pub mod analytics;
pub mod storage;
