// Library root: re-exports all modules so the CLI, integration tests and
// external consumers can access the crate's public API.

pub mod artifacts;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod import;
pub mod labels;
pub mod population;
pub mod report;
pub mod stats;
pub mod valuation;
