//! HTTP client for the engine's external task REST API.
//!
//! Provides [`HttpTaskService`], a [`extask_core::TaskService`] backed by
//! reqwest, for use with the extask worker engine.

mod error;
pub mod http;

pub use http::{ClientOptions, HttpTaskService, DEFAULT_ENDPOINT_URL, DEFAULT_TIMEOUT};
