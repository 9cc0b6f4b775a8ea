//! External task worker.
//!
//! [`Worker`] long-polls a [`extask_core::TaskService`] for locked tasks on
//! the subscribed topics and runs a [`Handler`] for each one on a bounded
//! pool. Handlers report outcomes through a [`TaskContext`]; panics are
//! contained per task and reported as failures.

pub mod backoff;
pub mod config;
pub mod context;
pub mod engine;
pub mod fault;
pub mod handler;
pub mod lease;
pub mod testing;

pub use config::WorkerOptions;
pub use context::{ExternalTaskContext, Failure, TaskContext};
pub use engine::{Subscription, Worker};
pub use handler::{Handler, HandlerError};
pub use lease::LockExtender;
