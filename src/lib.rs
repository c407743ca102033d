//! Transfer market and contract lifecycle engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod market;
pub mod storage;
pub mod types;
