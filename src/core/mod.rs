//! Core data model: identifiers, jobs and scheduled jobs.

pub mod job;
pub mod types;
