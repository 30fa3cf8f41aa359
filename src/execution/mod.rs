//! Job execution.
//!
//! This module provides the handler registry workers dispatch jobs through
//! and the service that runs the worker pool.

mod handler;
mod service;

pub use handler::{HandlerError, HandlerRegistry, JobHandler, Work, WorkHandler};
pub use service::{JobSchedulerService, ServiceError};
