//! Structural validation of inbound calls.
//!
//! These checks only look at the message itself. Anything that needs agent
//! state (does the executor exist, is the caller allowed) happens later.

use crate::error::{AgentError, Result};
use crate::wire::agent::{call, Call};
use crate::wire::executor;
use crate::wire::mesos::ContainerId;

fn invalid(message: impl Into<String>) -> AgentError {
    AgentError::ValidationError(message.into())
}

/// Validates an identifier value.
pub fn validate_id(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid("ID must not be empty"));
    }
    if value == "." || value == ".." {
        return Err(invalid(format!("'{}' is disallowed", value)));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(format!("'{}' contains invalid character '{}'", value, bad)));
    }
    Ok(())
}

/// Validates a container id and each of its ancestors.
pub fn validate_container_id(container_id: &ContainerId) -> Result<()> {
    validate_id(&container_id.value)?;
    if let Some(parent) = &container_id.parent {
        validate_container_id(parent)
            .map_err(|e| invalid(format!("'parent' is invalid: {}", strip(&e))))?;
    }
    Ok(())
}

fn strip(err: &AgentError) -> String {
    match err {
        AgentError::ValidationError(message) => message.clone(),
        other => other.to_string(),
    }
}

fn require_container_id<'a>(
    container_id: Option<&'a ContainerId>,
    field: &str,
) -> Result<&'a ContainerId> {
    let container_id =
        container_id.ok_or_else(|| invalid(format!("Expecting '{}' to be present", field)))?;
    validate_container_id(container_id)
        .map_err(|e| invalid(format!("'{}' is invalid: {}", field, strip(&e))))?;
    Ok(container_id)
}

fn require<T>(value: Option<&T>, field: &str) -> Result<()> {
    match value {
        Some(_) => Ok(()),
        None => Err(invalid(format!("Expecting '{}' to be present", field))),
    }
}

/// Validates an operator API call.
pub fn validate_call(call: &Call) -> Result<()> {
    let Some(kind) = call::Type::from_number(call.r#type) else {
        // Unrecognized kinds are answered with "not implemented".
        return Ok(());
    };

    match kind {
        call::Type::Unknown
        | call::Type::GetHealth
        | call::Type::GetFlags
        | call::Type::GetVersion
        | call::Type::GetLoggingLevel
        | call::Type::GetState
        | call::Type::GetContainers
        | call::Type::GetFrameworks
        | call::Type::GetExecutors
        | call::Type::GetTasks => Ok(()),

        call::Type::GetMetrics => require(call.get_metrics.as_ref(), "get_metrics"),

        call::Type::SetLoggingLevel => {
            let payload = call
                .set_logging_level
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'set_logging_level' to be present"))?;
            match &payload.duration {
                Some(duration) if duration.nanoseconds >= 0 => Ok(()),
                Some(_) => Err(invalid("'set_logging_level.duration' must not be negative")),
                None => Err(invalid("Expecting 'set_logging_level.duration' to be present")),
            }
        }

        call::Type::ListFiles => require(call.list_files.as_ref(), "list_files"),

        call::Type::ReadFile => require(call.read_file.as_ref(), "read_file"),

        call::Type::LaunchNestedContainer => {
            let payload = call
                .launch_nested_container
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'launch_nested_container' to be present"))?;
            let container_id = require_container_id(
                payload.container_id.as_ref(),
                "launch_nested_container.container_id",
            )?;
            if container_id.parent.is_none() {
                return Err(invalid(
                    "Expecting 'launch_nested_container.container_id.parent' to be present",
                ));
            }
            Ok(())
        }

        call::Type::WaitNestedContainer => {
            let payload = call
                .wait_nested_container
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'wait_nested_container' to be present"))?;
            require_container_id(
                payload.container_id.as_ref(),
                "wait_nested_container.container_id",
            )?;
            Ok(())
        }

        call::Type::KillNestedContainer => {
            let payload = call
                .kill_nested_container
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'kill_nested_container' to be present"))?;
            require_container_id(
                payload.container_id.as_ref(),
                "kill_nested_container.container_id",
            )?;
            Ok(())
        }

        call::Type::LaunchNestedContainerSession => {
            let payload = call.launch_nested_container_session.as_ref().ok_or_else(|| {
                invalid("Expecting 'launch_nested_container_session' to be present")
            })?;
            let container_id = require_container_id(
                payload.container_id.as_ref(),
                "launch_nested_container_session.container_id",
            )?;
            if container_id.parent.is_none() {
                return Err(invalid(
                    "Expecting 'launch_nested_container_session.container_id.parent' to be present",
                ));
            }
            Ok(())
        }

        call::Type::AttachContainerInput => {
            let payload = call
                .attach_container_input
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'attach_container_input' to be present"))?;
            match call::attach_container_input::Type::from_number(payload.r#type) {
                Some(call::attach_container_input::Type::ContainerId) => {
                    require_container_id(
                        payload.container_id.as_ref(),
                        "attach_container_input.container_id",
                    )?;
                    Ok(())
                }
                Some(call::attach_container_input::Type::ProcessIo) => require(
                    payload.process_io.as_ref(),
                    "attach_container_input.process_io",
                ),
                _ => Err(invalid("Expecting 'attach_container_input.type' to be set")),
            }
        }

        call::Type::AttachContainerOutput => {
            let payload = call
                .attach_container_output
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'attach_container_output' to be present"))?;
            require_container_id(
                payload.container_id.as_ref(),
                "attach_container_output.container_id",
            )?;
            Ok(())
        }
    }
}

/// Validates an executor API call.
pub fn validate_executor_call(call: &executor::Call) -> Result<()> {
    let framework_id = call
        .framework_id
        .as_ref()
        .ok_or_else(|| invalid("Expecting 'framework_id' to be present"))?;
    validate_id(&framework_id.value)
        .map_err(|e| invalid(format!("'framework_id' is invalid: {}", strip(&e))))?;

    let executor_id = call
        .executor_id
        .as_ref()
        .ok_or_else(|| invalid("Expecting 'executor_id' to be present"))?;
    validate_id(&executor_id.value)
        .map_err(|e| invalid(format!("'executor_id' is invalid: {}", strip(&e))))?;

    match executor::call::Type::from_number(call.r#type) {
        Some(executor::call::Type::Subscribe) => require(call.subscribe.as_ref(), "subscribe"),
        Some(executor::call::Type::Update) => {
            let update = call
                .update
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'update' to be present"))?;
            let status = update
                .status
                .as_ref()
                .ok_or_else(|| invalid("Expecting 'update.status' to be present"))?;
            if status.task_id.is_none() {
                return Err(invalid("Expecting 'update.status.task_id' to be present"));
            }
            if status.uuid.is_none() {
                return Err(invalid("Expecting 'uuid' to be present"));
            }
            if let Some(status_executor) = &status.executor_id {
                if status_executor != executor_id {
                    return Err(invalid(format!(
                        "ExecutorID in Call: {} does not match ExecutorID in TaskStatus: {}",
                        executor_id, status_executor
                    )));
                }
            }
            Ok(())
        }
        Some(executor::call::Type::Message) => require(call.message.as_ref(), "message"),
        Some(executor::call::Type::Unknown) | None => Ok(()),
    }
}
