//! A3S Agent Core - Wire Types and Shared Abstractions
//!
//! This crate provides the protocol messages, content codecs, RecordIO
//! framing, in-process pipes, configuration and error types shared by the
//! agent service.

pub mod call;
pub mod config;
pub mod content;
pub mod error;
pub mod event;
pub mod pipe;
pub mod recordio;
pub mod validation;
pub mod wire;

// Re-export commonly used types
pub use call::{AgentCall, AgentResponse};
pub use config::{AclConfig, AgentConfig, Credential, LogLevel};
pub use content::{Accept, ContentType, WireMessage};
pub use error::{AgentError, Result};
pub use event::{AgentEvent, EventEmitter};
pub use pipe::{pipe, PipeError, PipeReader, PipeWriter};
pub use recordio::RecordReader;

/// A3S Agent version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
