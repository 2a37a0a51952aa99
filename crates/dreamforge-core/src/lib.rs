//! Domain model, repository/port traits, and pure logic for the dreamforge
//! job-orchestration core.
//!
//! This crate has no opinion on how Postgres, S3, or a GPU are reached; it
//! defines the shapes ([`model`]) and capabilities ([`repository`],
//! [`ports`]) that the rest of the workspace implements and calls.

pub mod config;
pub mod error;
pub mod keys;
pub mod model;
pub mod model_installer;
pub mod ports;
pub mod progress;
pub mod repository;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use config::Config;
pub use error::{DfError, DfResult};
