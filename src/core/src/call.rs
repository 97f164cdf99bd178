//! Typed views of validated calls and of the responses built for them.
//!
//! The wire `Call` keeps every payload optional. After validation it is
//! converted into [`AgentCall`], where each kind carries exactly the data
//! its handler needs, so dispatch is an exhaustive `match`.

use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::validation::validate_call;
use crate::wire::agent::{call, response, Call, Response};
use crate::wire::mesos::{
    CommandInfo, ContainerId, ContainerInfo, FileInfo, Flag, Metric, VersionInfo,
};

/// Parameters for launching a nested container.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedLaunch {
    pub container_id: ContainerId,
    pub command: CommandInfo,
    pub container: Option<ContainerInfo>,
}

/// A validated operator call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCall {
    Unknown,
    GetHealth,
    GetFlags,
    GetVersion,
    GetMetrics {
        timeout: Option<Duration>,
    },
    GetLoggingLevel,
    SetLoggingLevel {
        level: u32,
        duration: Duration,
    },
    ListFiles {
        path: String,
    },
    ReadFile {
        path: String,
        offset: u64,
        length: Option<u64>,
    },
    GetState,
    GetContainers,
    GetFrameworks,
    GetExecutors,
    GetTasks,
    LaunchNestedContainer(NestedLaunch),
    WaitNestedContainer {
        container_id: ContainerId,
    },
    KillNestedContainer {
        container_id: ContainerId,
    },
    LaunchNestedContainerSession(NestedLaunch),
    /// Only the opening record of an input stream converts; it names the
    /// container. The records that follow are relayed as-is.
    AttachContainerInput {
        container_id: ContainerId,
    },
    AttachContainerOutput {
        container_id: ContainerId,
    },
}

impl AgentCall {
    /// Wire kind of this call.
    pub fn kind(&self) -> call::Type {
        match self {
            AgentCall::Unknown => call::Type::Unknown,
            AgentCall::GetHealth => call::Type::GetHealth,
            AgentCall::GetFlags => call::Type::GetFlags,
            AgentCall::GetVersion => call::Type::GetVersion,
            AgentCall::GetMetrics { .. } => call::Type::GetMetrics,
            AgentCall::GetLoggingLevel => call::Type::GetLoggingLevel,
            AgentCall::SetLoggingLevel { .. } => call::Type::SetLoggingLevel,
            AgentCall::ListFiles { .. } => call::Type::ListFiles,
            AgentCall::ReadFile { .. } => call::Type::ReadFile,
            AgentCall::GetState => call::Type::GetState,
            AgentCall::GetContainers => call::Type::GetContainers,
            AgentCall::GetFrameworks => call::Type::GetFrameworks,
            AgentCall::GetExecutors => call::Type::GetExecutors,
            AgentCall::GetTasks => call::Type::GetTasks,
            AgentCall::LaunchNestedContainer(_) => call::Type::LaunchNestedContainer,
            AgentCall::WaitNestedContainer { .. } => call::Type::WaitNestedContainer,
            AgentCall::KillNestedContainer { .. } => call::Type::KillNestedContainer,
            AgentCall::LaunchNestedContainerSession(_) => {
                call::Type::LaunchNestedContainerSession
            }
            AgentCall::AttachContainerInput { .. } => call::Type::AttachContainerInput,
            AgentCall::AttachContainerOutput { .. } => call::Type::AttachContainerOutput,
        }
    }
}

fn missing(field: &str) -> AgentError {
    AgentError::ValidationError(format!("Expecting '{}' to be present", field))
}

impl TryFrom<&Call> for AgentCall {
    type Error = AgentError;

    fn try_from(wire: &Call) -> Result<Self> {
        validate_call(wire)?;

        let Some(kind) = call::Type::from_number(wire.r#type) else {
            return Ok(AgentCall::Unknown);
        };

        let typed = match kind {
            call::Type::Unknown => AgentCall::Unknown,
            call::Type::GetHealth => AgentCall::GetHealth,
            call::Type::GetFlags => AgentCall::GetFlags,
            call::Type::GetVersion => AgentCall::GetVersion,
            call::Type::GetMetrics => AgentCall::GetMetrics {
                timeout: wire
                    .get_metrics
                    .as_ref()
                    .and_then(|m| m.timeout.as_ref())
                    .map(|t| t.to_duration()),
            },
            call::Type::GetLoggingLevel => AgentCall::GetLoggingLevel,
            call::Type::SetLoggingLevel => {
                let payload = wire
                    .set_logging_level
                    .as_ref()
                    .ok_or_else(|| missing("set_logging_level"))?;
                AgentCall::SetLoggingLevel {
                    level: payload.level,
                    duration: payload
                        .duration
                        .as_ref()
                        .map(|d| d.to_duration())
                        .unwrap_or_default(),
                }
            }
            call::Type::ListFiles => AgentCall::ListFiles {
                path: wire
                    .list_files
                    .as_ref()
                    .ok_or_else(|| missing("list_files"))?
                    .path
                    .clone(),
            },
            call::Type::ReadFile => {
                let payload = wire.read_file.as_ref().ok_or_else(|| missing("read_file"))?;
                AgentCall::ReadFile {
                    path: payload.path.clone(),
                    offset: payload.offset,
                    length: payload.length,
                }
            }
            call::Type::GetState => AgentCall::GetState,
            call::Type::GetContainers => AgentCall::GetContainers,
            call::Type::GetFrameworks => AgentCall::GetFrameworks,
            call::Type::GetExecutors => AgentCall::GetExecutors,
            call::Type::GetTasks => AgentCall::GetTasks,
            call::Type::LaunchNestedContainer => {
                let payload = wire
                    .launch_nested_container
                    .as_ref()
                    .ok_or_else(|| missing("launch_nested_container"))?;
                AgentCall::LaunchNestedContainer(NestedLaunch {
                    container_id: payload
                        .container_id
                        .clone()
                        .ok_or_else(|| missing("launch_nested_container.container_id"))?,
                    command: payload.command.clone().unwrap_or_default(),
                    container: payload.container.clone(),
                })
            }
            call::Type::WaitNestedContainer => AgentCall::WaitNestedContainer {
                container_id: wire
                    .wait_nested_container
                    .as_ref()
                    .and_then(|p| p.container_id.clone())
                    .ok_or_else(|| missing("wait_nested_container.container_id"))?,
            },
            call::Type::KillNestedContainer => AgentCall::KillNestedContainer {
                container_id: wire
                    .kill_nested_container
                    .as_ref()
                    .and_then(|p| p.container_id.clone())
                    .ok_or_else(|| missing("kill_nested_container.container_id"))?,
            },
            call::Type::LaunchNestedContainerSession => {
                let payload = wire
                    .launch_nested_container_session
                    .as_ref()
                    .ok_or_else(|| missing("launch_nested_container_session"))?;
                AgentCall::LaunchNestedContainerSession(NestedLaunch {
                    container_id: payload.container_id.clone().ok_or_else(|| {
                        missing("launch_nested_container_session.container_id")
                    })?,
                    command: payload.command.clone().unwrap_or_default(),
                    container: payload.container.clone(),
                })
            }
            call::Type::AttachContainerInput => {
                let payload = wire
                    .attach_container_input
                    .as_ref()
                    .ok_or_else(|| missing("attach_container_input"))?;
                if payload.r#type() != call::attach_container_input::Type::ContainerId {
                    return Err(AgentError::ValidationError(
                        "Expecting 'attach_container_input.type' to be CONTAINER_ID".to_string(),
                    ));
                }
                AgentCall::AttachContainerInput {
                    container_id: payload
                        .container_id
                        .clone()
                        .ok_or_else(|| missing("attach_container_input.container_id"))?,
                }
            }
            call::Type::AttachContainerOutput => AgentCall::AttachContainerOutput {
                container_id: wire
                    .attach_container_output
                    .as_ref()
                    .and_then(|p| p.container_id.clone())
                    .ok_or_else(|| missing("attach_container_output.container_id"))?,
            },
        };

        Ok(typed)
    }
}

/// A successful reply, one variant per response kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResponse {
    GetHealth { healthy: bool },
    GetFlags(Vec<Flag>),
    GetVersion(VersionInfo),
    GetMetrics(Vec<Metric>),
    GetLoggingLevel { level: u32 },
    ListFiles(Vec<FileInfo>),
    ReadFile { size: u64, data: Vec<u8> },
    GetState(response::GetState),
    GetContainers(Vec<response::get_containers::Container>),
    GetFrameworks(response::GetFrameworks),
    GetExecutors(response::GetExecutors),
    GetTasks(response::GetTasks),
    WaitNestedContainer { exit_status: Option<i32> },
}

impl From<AgentResponse> for Response {
    fn from(value: AgentResponse) -> Self {
        let mut wire = Response::default();
        match value {
            AgentResponse::GetHealth { healthy } => {
                wire.r#type = response::Type::GetHealth as i32;
                wire.get_health = Some(response::GetHealth { healthy });
            }
            AgentResponse::GetFlags(flags) => {
                wire.r#type = response::Type::GetFlags as i32;
                wire.get_flags = Some(response::GetFlags { flags });
            }
            AgentResponse::GetVersion(version_info) => {
                wire.r#type = response::Type::GetVersion as i32;
                wire.get_version = Some(response::GetVersion {
                    version_info: Some(version_info),
                });
            }
            AgentResponse::GetMetrics(metrics) => {
                wire.r#type = response::Type::GetMetrics as i32;
                wire.get_metrics = Some(response::GetMetrics { metrics });
            }
            AgentResponse::GetLoggingLevel { level } => {
                wire.r#type = response::Type::GetLoggingLevel as i32;
                wire.get_logging_level = Some(response::GetLoggingLevel { level });
            }
            AgentResponse::ListFiles(file_infos) => {
                wire.r#type = response::Type::ListFiles as i32;
                wire.list_files = Some(response::ListFiles { file_infos });
            }
            AgentResponse::ReadFile { size, data } => {
                wire.r#type = response::Type::ReadFile as i32;
                wire.read_file = Some(response::ReadFile { size, data });
            }
            AgentResponse::GetState(state) => {
                wire.r#type = response::Type::GetState as i32;
                wire.get_state = Some(state);
            }
            AgentResponse::GetContainers(containers) => {
                wire.r#type = response::Type::GetContainers as i32;
                wire.get_containers = Some(response::GetContainers { containers });
            }
            AgentResponse::GetFrameworks(frameworks) => {
                wire.r#type = response::Type::GetFrameworks as i32;
                wire.get_frameworks = Some(frameworks);
            }
            AgentResponse::GetExecutors(executors) => {
                wire.r#type = response::Type::GetExecutors as i32;
                wire.get_executors = Some(executors);
            }
            AgentResponse::GetTasks(tasks) => {
                wire.r#type = response::Type::GetTasks as i32;
                wire.get_tasks = Some(tasks);
            }
            AgentResponse::WaitNestedContainer { exit_status } => {
                wire.r#type = response::Type::WaitNestedContainer as i32;
                wire.wait_nested_container = Some(response::WaitNestedContainer { exit_status });
            }
        }
        wire
    }
}
