//! Consolidated integration tests for machguard-core.
//!
//! A single test binary keeps proptest suites from running as parallel
//! processes.

mod engine;
mod fixtures;
mod integrity;
mod macho;
mod signatures;
