//! A3S Agent - Operator and Executor HTTP APIs
//!
//! Serves the versioned agent call API on `/api/v1`, the executor API on
//! `/api/v1/executor` and a filtered JSON state document on `/state`.
//! Nested containers are launched, attached to and destroyed through a
//! pluggable [`containerizer::Containerizer`].

pub mod api;
pub mod authentication;
pub mod authorization;
pub mod containerizer;
pub mod error;
pub mod executor_api;
pub mod files;
pub mod logging;
pub mod metrics;
pub mod nested;
pub mod relay;
pub mod server;
pub mod store;
pub mod views;
pub mod writers;

pub use api::AgentContext;
pub use authorization::{AclAuthorizer, Authorizer};
pub use containerizer::{Containerizer, LocalContainerizer};
pub use error::ApiError;
pub use logging::LoggingControl;
pub use server::AgentServer;
pub use store::{AgentStore, RetentionLimits};
