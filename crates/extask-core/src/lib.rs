//! extask Core Domain Types
//!
//! Pure domain types shared by the worker engine and the engine clients:
//! - identifiers and the locked task snapshot
//! - request payloads of the external task API
//! - the typed variable codec
//! - the `TaskService` interface the worker talks to
//!
//! Nothing here performs network I/O.

pub mod error;
pub mod ids;
pub mod request;
pub mod service;
pub mod task;
pub mod time;
pub mod variable;
pub mod variables;

// Re-export commonly used types
pub use error::{ServiceError, VariableError};
pub use ids::{TaskId, WorkerId};
pub use request::{
    BpmnErrorRequest, CompleteRequest, ExtendLockRequest, FailureRequest, FetchAndLockRequest,
    TopicSubscription,
};
pub use service::TaskService;
pub use task::LockedTask;
pub use variable::{ValueInfo, ValueType, Variable};
pub use variables::Variables;
