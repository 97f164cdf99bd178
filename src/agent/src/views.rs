//! Filtered state enumeration.
//!
//! Every listing walks a state snapshot and keeps only the entities the
//! caller's approvers allow. Active entities come before completed ones and
//! insertion order is preserved.

use a3s_agent_core::wire::agent::response::{
    get_executors, get_frameworks, GetExecutors, GetFrameworks, GetState, GetTasks,
};
use a3s_agent_core::wire::mesos::{Task, TaskState};

use crate::authorization::{
    approve_view_executor, approve_view_framework, approve_view_task, approve_view_task_info,
    ObjectApprover, ViewApprovers,
};
use crate::store::{AgentState, Executor, Framework};

fn visible_frameworks<'a>(
    frameworks: impl Iterator<Item = &'a Framework>,
    approver: &'a dyn ObjectApprover,
) -> impl Iterator<Item = &'a Framework> {
    frameworks.filter(move |framework| approve_view_framework(approver, &framework.info))
}

pub fn get_frameworks(state: &AgentState, frameworks: &dyn ObjectApprover) -> GetFrameworks {
    let entry = |framework: &Framework| get_frameworks::Framework {
        framework_info: Some(framework.info.clone()),
    };

    GetFrameworks {
        frameworks: visible_frameworks(state.frameworks.iter(), frameworks)
            .map(entry)
            .collect(),
        completed_frameworks: visible_frameworks(state.completed_frameworks.iter(), frameworks)
            .map(entry)
            .collect(),
    }
}

pub fn get_executors(
    state: &AgentState,
    frameworks: &dyn ObjectApprover,
    executors: &dyn ObjectApprover,
) -> GetExecutors {
    let mut result = GetExecutors::default();

    let all = state
        .frameworks
        .iter()
        .chain(state.completed_frameworks.iter());
    for framework in visible_frameworks(all, frameworks) {
        let visible = |executor: &&Executor| {
            approve_view_executor(executors, &executor.info, &framework.info)
        };
        let entry = |executor: &Executor| get_executors::Executor {
            executor_info: Some(executor.info.clone()),
        };

        result
            .executors
            .extend(framework.executors.iter().filter(visible).map(entry));
        result.completed_executors.extend(
            framework
                .completed_executors
                .iter()
                .filter(visible)
                .map(entry),
        );
    }

    result
}

pub fn get_tasks(
    state: &AgentState,
    frameworks: &dyn ObjectApprover,
    tasks: &dyn ObjectApprover,
) -> GetTasks {
    let mut result = GetTasks::default();

    let all = state
        .frameworks
        .iter()
        .chain(state.completed_frameworks.iter());
    for framework in visible_frameworks(all, frameworks) {
        let info = &framework.info;
        let visible = |task: &&Task| approve_view_task(tasks, task, info);

        for pending in &framework.pending_tasks {
            if approve_view_task_info(tasks, pending, info) {
                result
                    .pending_tasks
                    .push(Task::from_info(pending, &framework.id, TaskState::TaskStaging));
            }
        }

        for executor in &framework.executors {
            for queued in &executor.queued_tasks {
                if approve_view_task_info(tasks, queued, info) {
                    let mut task = Task::from_info(queued, &framework.id, TaskState::TaskStaging);
                    task.executor_id = Some(executor.id.clone());
                    result.queued_tasks.push(task);
                }
            }
            result
                .launched_tasks
                .extend(executor.launched_tasks.iter().filter(visible).cloned());
            result
                .terminated_tasks
                .extend(executor.terminated_tasks.iter().filter(visible).cloned());
            result
                .completed_tasks
                .extend(executor.completed_tasks.iter().filter(visible).cloned());
        }

        for executor in &framework.completed_executors {
            result
                .completed_tasks
                .extend(executor.completed_tasks.iter().filter(visible).cloned());
        }
    }

    result
}

/// GET_TASKS, GET_EXECUTORS and GET_FRAMEWORKS combined.
pub fn get_state(state: &AgentState, approvers: &ViewApprovers) -> GetState {
    GetState {
        get_tasks: Some(get_tasks(
            state,
            approvers.frameworks.as_ref(),
            approvers.tasks.as_ref(),
        )),
        get_executors: Some(get_executors(
            state,
            approvers.frameworks.as_ref(),
            approvers.executors.as_ref(),
        )),
        get_frameworks: Some(get_frameworks(state, approvers.frameworks.as_ref())),
    }
}
