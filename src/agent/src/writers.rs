//! The `GET /state` JSON snapshot.
//!
//! Filtering uses the same per-entity decisions as the typed listings, so a
//! principal sees exactly the frameworks, executors and tasks it would see
//! through GET_STATE.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use a3s_agent_core::config::AgentConfig;
use a3s_agent_core::wire::mesos::{Task, TaskInfo};
use a3s_agent_core::VERSION;

use crate::api::AgentContext;
use crate::authorization::{
    approve_view_executor, approve_view_flags, approve_view_framework, approve_view_task,
    approve_view_task_info, ViewApprovers,
};
use crate::error::ApiError;
use crate::store::{AgentState, Executor, ExecutorState, Framework};

#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub version: String,
    pub id: String,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<BTreeMap<String, String>>,
    pub frameworks: Vec<FrameworkEntry>,
    pub completed_frameworks: Vec<FrameworkEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkEntry {
    pub id: String,
    pub name: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub executors: Vec<ExecutorEntry>,
    pub completed_executors: Vec<ExecutorEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutorEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container: String,
    pub state: &'static str,
    pub tasks: Vec<Task>,
    pub queued_tasks: Vec<TaskInfo>,
    pub completed_tasks: Vec<Task>,
}

fn executor_state(state: ExecutorState) -> &'static str {
    match state {
        ExecutorState::Registering => "REGISTERING",
        ExecutorState::Running => "RUNNING",
        ExecutorState::Terminating => "TERMINATING",
        ExecutorState::Terminated => "TERMINATED",
    }
}

fn executor_entry(
    executor: &Executor,
    framework: &Framework,
    approvers: &ViewApprovers,
) -> ExecutorEntry {
    let info = &framework.info;
    let tasks = approvers.tasks.as_ref();
    let visible = |task: &&Task| approve_view_task(tasks, task, info);

    ExecutorEntry {
        id: executor.id.to_string(),
        name: executor.info.name.clone(),
        container: executor.container_id.to_string(),
        state: executor_state(executor.state),
        tasks: executor
            .launched_tasks
            .iter()
            .chain(executor.terminated_tasks.iter())
            .filter(visible)
            .cloned()
            .collect(),
        queued_tasks: executor
            .queued_tasks
            .iter()
            .filter(|task| approve_view_task_info(tasks, task, info))
            .cloned()
            .collect(),
        completed_tasks: executor
            .completed_tasks
            .iter()
            .filter(visible)
            .cloned()
            .collect(),
    }
}

fn framework_entry(framework: &Framework, approvers: &ViewApprovers) -> FrameworkEntry {
    let executors = approvers.executors.as_ref();
    let visible =
        |executor: &&Executor| approve_view_executor(executors, &executor.info, &framework.info);

    FrameworkEntry {
        id: framework.id.to_string(),
        name: framework.info.name.clone(),
        user: framework.info.user.clone(),
        role: framework.info.role.clone(),
        executors: framework
            .executors
            .iter()
            .filter(visible)
            .map(|executor| executor_entry(executor, framework, approvers))
            .collect(),
        completed_executors: framework
            .completed_executors
            .iter()
            .filter(visible)
            .map(|executor| executor_entry(executor, framework, approvers))
            .collect(),
    }
}

fn framework_entries<'a>(
    frameworks: impl Iterator<Item = &'a Framework>,
    approvers: &ViewApprovers,
) -> Vec<FrameworkEntry> {
    frameworks
        .filter(|framework| approve_view_framework(approvers.frameworks.as_ref(), &framework.info))
        .map(|framework| framework_entry(framework, approvers))
        .collect()
}

/// Renders the agent state as the principal behind `approvers` may see it.
pub fn state_snapshot(
    config: &AgentConfig,
    state: &AgentState,
    approvers: &ViewApprovers,
) -> StateSnapshot {
    let flags = approve_view_flags(approvers.flags.as_ref()).then(|| {
        config
            .flags()
            .into_iter()
            .map(|flag| (flag.name, flag.value.unwrap_or_default()))
            .collect()
    });

    StateSnapshot {
        version: VERSION.to_string(),
        id: config.agent_id.clone(),
        hostname: config.hostname.clone(),
        flags,
        frameworks: framework_entries(state.frameworks.iter(), approvers),
        completed_frameworks: framework_entries(state.completed_frameworks.iter(), approvers),
    }
}

pub async fn handle(State(ctx): State<Arc<AgentContext>>, headers: HeaderMap) -> Response {
    match serve(&ctx, &headers).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn serve(ctx: &AgentContext, headers: &HeaderMap) -> Result<StateSnapshot, ApiError> {
    let principal = ctx.authenticator.authenticate(headers)?;
    let approvers = ctx
        .gate
        .view_approvers(principal.as_deref())
        .await
        .map_err(ApiError::internal)?;
    let state = ctx.store.snapshot().await;
    Ok(state_snapshot(&ctx.config, &state, &approvers))
}
