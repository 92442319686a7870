//! Scenario harness for rtmutex.
//!
//! This crate provides:
//! - Fixtures: JSON scenarios of per-thread mutex operations and expected results
//! - Runner: drives each logical thread on its own OS thread against a fresh kernel
//! - Matrix: the abstract transition table rendered as JSON rows
//! - Structured logging: one JSONL record per executed step

#![forbid(unsafe_code)]

pub mod error;
pub mod fixtures;
pub mod matrix;
pub mod runner;
pub mod structured_log;

pub use error::HarnessError;
pub use fixtures::{Expected, ScenarioFixture, Step, StepOp};
pub use runner::{ScenarioReport, ScenarioRunner, StepResult};
