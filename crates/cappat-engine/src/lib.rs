//! Submission and monitoring of BIDS app participant jobs on HPC batch
//! schedulers.
//!
//! A [`TaskManager`] takes a list of [`Task`]s, submits them through a
//! [`SubmissionBackend`] chosen for the execution system, polls the scheduler
//! until every job finished, and aggregates their exit codes before running
//! the group level.

pub mod backend;
pub mod command;
mod config;
mod error;
mod job;
mod manager;
mod runtime;
pub mod script;
pub mod selector;
pub mod status;

pub use backend::SubmissionBackend;
pub use config::*;
pub use error::*;
pub use job::*;
pub use manager::*;
pub use runtime::*;
pub use selector::BackendKind;
