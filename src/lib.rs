//! LEAPFROG: fee-exact leap decision and portfolio reallocation engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod sources;
pub mod strategy;
pub mod portfolio;
pub mod engine;
pub mod storage;
