//! Container runtime interface.
//!
//! The agent never touches processes directly. Launch, wait, destroy and
//! attach all go through a [`Containerizer`], and attached I/O flows over a
//! [`Connection`] that speaks the same call/RecordIO protocol as the agent
//! API itself.

pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use http::StatusCode;

use a3s_agent_core::content::ContentType;
use a3s_agent_core::error::{AgentError, Result};
use a3s_agent_core::pipe::PipeReader;
use a3s_agent_core::wire::mesos::{
    AgentId, CommandInfo, ContainerId, ContainerInfo, ContainerStatus, ResourceStatistics,
};

pub use local::LocalContainerizer;

/// How a container is treated by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerClass {
    #[default]
    Default,
    /// Short-lived container tied to an operator session.
    Debug,
}

/// Everything the runtime needs to start a container.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub container_id: ContainerId,
    pub command: CommandInfo,
    pub container: Option<ContainerInfo>,
    pub user: Option<String>,
    pub agent_id: AgentId,
    pub class: ContainerClass,
}

/// How a container ended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerTermination {
    /// Raw wait status, when the process exited.
    pub status: Option<i32>,
    pub message: Option<String>,
}

#[async_trait]
pub trait Containerizer: Send + Sync {
    /// Starts a container. `Ok(false)` means the runtime does not support
    /// the requested container configuration.
    async fn launch(&self, spec: LaunchSpec) -> Result<bool>;

    /// Waits for the container to terminate. `Ok(None)` if it is unknown.
    async fn wait(&self, container_id: &ContainerId) -> Result<Option<ContainerTermination>>;

    /// Kills the container. `Ok(false)` if it is unknown or already gone.
    async fn destroy(&self, container_id: &ContainerId) -> Result<bool>;

    /// Opens an I/O connection to the container.
    async fn attach(&self, container_id: &ContainerId) -> Result<Box<dyn Connection>>;

    async fn status(&self, container_id: &ContainerId) -> Result<ContainerStatus>;

    async fn usage(&self, container_id: &ContainerId) -> Result<ResourceStatistics>;
}

/// Body of an I/O request or response.
#[derive(Debug)]
pub enum IoBody {
    /// Whole body, already in memory.
    Full(Bytes),
    /// Live byte stream.
    Pipe(PipeReader),
}

impl IoBody {
    /// The body as a chunk stream, whichever form it has.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self {
            IoBody::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            IoBody::Pipe(reader) => reader.map_err(AgentError::from).boxed(),
        }
    }

    /// Buffers the whole body.
    pub async fn into_bytes(self) -> Result<Bytes> {
        match self {
            IoBody::Full(bytes) => Ok(bytes),
            IoBody::Pipe(mut reader) => Ok(reader.read_all().await?),
        }
    }
}

/// A request sent over a container connection.
#[derive(Debug)]
pub struct IoRequest {
    pub content_type: ContentType,
    pub accept: ContentType,
    pub body: IoBody,
}

/// The container side's answer.
#[derive(Debug)]
pub struct IoResponse {
    pub status: StatusCode,
    pub content_type: Option<ContentType>,
    pub body: IoBody,
}

impl IoResponse {
    pub fn ok(content_type: ContentType, body: IoBody) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: Some(content_type),
            body,
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            content_type: None,
            body: IoBody::Full(Bytes::new()),
        }
    }

    /// A non-success answer with a plain-text reason.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            content_type: None,
            body: IoBody::Full(Bytes::from(message.into())),
        }
    }
}

/// One attached I/O exchange with a container.
#[async_trait]
pub trait Connection: Send {
    async fn send(self: Box<Self>, request: IoRequest) -> Result<IoResponse>;
}
