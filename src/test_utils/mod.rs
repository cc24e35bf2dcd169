//! Shared fixtures for unit tests: loggers, descriptors, log entries,
//! stores and an engine conformance suite.
mod common;
mod engine_suite;
mod entry_builder;
mod store_fixture;

pub use common::*;
pub use engine_suite::*;
pub use entry_builder::*;
pub use store_fixture::*;
