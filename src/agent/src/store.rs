//! Agent-local state: frameworks, their executors, and tasks.
//!
//! Frameworks and executors are kept in insertion order and looked up by
//! linear scan. Completed entities are retained in bounded lists so state
//! queries can still report them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use a3s_agent_core::config::AgentConfig;
use a3s_agent_core::wire::executor::{event, Event};
use a3s_agent_core::wire::mesos::{
    AgentId, ContainerId, ExecutorId, ExecutorInfo, FrameworkId, FrameworkInfo, Task, TaskId,
    TaskInfo, TaskState, TaskStatus,
};

/// Lookup failures for executor-scoped operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Framework cannot be found")]
    FrameworkNotFound,

    #[error("Executor cannot be found")]
    ExecutorNotFound,

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Registering,
    Running,
    Terminating,
    Terminated,
}

/// The event stream of a subscribed executor.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    events: mpsc::UnboundedSender<Event>,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            id: Uuid::new_v4(),
            events,
        }
    }

    /// Pushes an event; false if the executor has disconnected.
    pub fn send(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct Executor {
    pub id: ExecutorId,
    pub framework_id: FrameworkId,
    pub info: ExecutorInfo,
    pub container_id: ContainerId,
    /// User nested containers run as unless the command overrides it.
    pub user: String,
    pub state: ExecutorState,
    pub queued_tasks: Vec<TaskInfo>,
    pub launched_tasks: Vec<Task>,
    pub terminated_tasks: Vec<Task>,
    pub completed_tasks: VecDeque<Task>,
    pub subscription: Option<Subscription>,
}

impl Executor {
    fn knows_task(&self, task_id: &TaskId) -> bool {
        self.launched_tasks
            .iter()
            .any(|t| t.task_id.as_ref() == Some(task_id))
            || self
                .queued_tasks
                .iter()
                .any(|t| t.task_id.as_ref() == Some(task_id))
    }

    fn find_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.launched_tasks
            .iter_mut()
            .find(|t| t.task_id.as_ref().map(|id| id.value.as_str()) == Some(task_id))
    }
}

#[derive(Debug, Clone)]
pub struct Framework {
    pub id: FrameworkId,
    pub info: FrameworkInfo,
    pub executors: Vec<Executor>,
    pub completed_executors: VecDeque<Executor>,
    /// Tasks accepted for the framework but not yet assigned to an executor.
    pub pending_tasks: Vec<TaskInfo>,
}

impl Framework {
    fn executor_mut(&mut self, executor_id: &ExecutorId) -> Option<&mut Executor> {
        self.executors.iter_mut().find(|e| &e.id == executor_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentState {
    pub frameworks: Vec<Framework>,
    pub completed_frameworks: VecDeque<Framework>,
}

impl AgentState {
    fn executor(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<&Executor, StoreError> {
        self.frameworks
            .iter()
            .find(|f| &f.id == framework_id)
            .ok_or(StoreError::FrameworkNotFound)?
            .executors
            .iter()
            .find(|e| &e.id == executor_id)
            .ok_or(StoreError::ExecutorNotFound)
    }

    fn framework_mut(&mut self, framework_id: &FrameworkId) -> Option<&mut Framework> {
        self.frameworks.iter_mut().find(|f| &f.id == framework_id)
    }

    fn executor_mut(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<&mut Executor, StoreError> {
        self.framework_mut(framework_id)
            .ok_or(StoreError::FrameworkNotFound)?
            .executor_mut(executor_id)
            .ok_or(StoreError::ExecutorNotFound)
    }

    /// First active executor matching `predicate`, with its framework.
    pub fn find_executor(
        &self,
        predicate: impl Fn(&Executor) -> bool,
    ) -> Option<(&Framework, &Executor)> {
        self.frameworks.iter().find_map(|framework| {
            framework
                .executors
                .iter()
                .find(|executor| predicate(executor))
                .map(|executor| (framework, executor))
        })
    }
}

/// How many completed entities are retained.
#[derive(Debug, Clone, Copy)]
pub struct RetentionLimits {
    pub frameworks: usize,
    pub executors_per_framework: usize,
    pub tasks_per_executor: usize,
}

impl From<&AgentConfig> for RetentionLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            frameworks: config.max_completed_frameworks,
            executors_per_framework: config.max_completed_executors_per_framework,
            tasks_per_executor: config.max_completed_tasks_per_executor,
        }
    }
}

/// Agent-side record of a task assigned to `executor_id`.
fn executor_task(
    info: &TaskInfo,
    framework_id: &FrameworkId,
    executor_id: &ExecutorId,
    state: TaskState,
) -> Task {
    let mut task = Task::from_info(info, framework_id, state);
    task.executor_id = Some(executor_id.clone());
    task
}

fn push_bounded<T>(list: &mut VecDeque<T>, item: T, limit: usize) {
    if limit == 0 {
        return;
    }
    while list.len() >= limit {
        list.pop_front();
    }
    list.push_back(item);
}

/// What an executor learns when it subscribes.
#[derive(Debug, Clone)]
pub struct Subscribed {
    pub subscription_id: Uuid,
    pub launched: usize,
}

/// Shared agent state.
pub struct AgentStore {
    state: RwLock<AgentState>,
    recovering: AtomicBool,
    limits: RetentionLimits,
}

impl AgentStore {
    pub fn new(limits: RetentionLimits) -> Self {
        Self {
            state: RwLock::new(AgentState::default()),
            recovering: AtomicBool::new(false),
            limits,
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    pub fn set_recovering(&self, recovering: bool) {
        self.recovering.store(recovering, Ordering::Release);
    }

    /// A point-in-time copy of the whole state.
    pub async fn snapshot(&self) -> AgentState {
        self.state.read().await.clone()
    }

    /// The executor whose container is `container_id.parent`.
    pub async fn executor_for_parent(
        &self,
        container_id: &ContainerId,
    ) -> Option<(FrameworkInfo, Executor)> {
        let parent = container_id.parent.as_deref()?;
        let state = self.state.read().await;
        state
            .find_executor(|executor| &executor.container_id == parent)
            .map(|(framework, executor)| (framework.info.clone(), executor.clone()))
    }

    /// The executor owning `container_id`, either as its own container or
    /// as the parent of a nested one.
    pub async fn executor_for_container(
        &self,
        container_id: &ContainerId,
    ) -> Option<(FrameworkInfo, Executor)> {
        let parent = container_id.parent.as_deref();
        let state = self.state.read().await;
        state
            .find_executor(|executor| {
                &executor.container_id == container_id || Some(&executor.container_id) == parent
            })
            .map(|(framework, executor)| (framework.info.clone(), executor.clone()))
    }

    /// Registers a framework, or refreshes the info of a known one.
    pub async fn add_framework(&self, info: FrameworkInfo) -> Result<FrameworkId, StoreError> {
        let id = info.id.clone().ok_or_else(|| {
            StoreError::Invalid("Expecting 'framework_info.id' to be present".to_string())
        })?;

        let mut state = self.state.write().await;
        match state.framework_mut(&id) {
            Some(framework) => framework.info = info,
            None => state.frameworks.push(Framework {
                id: id.clone(),
                info,
                executors: Vec::new(),
                completed_executors: VecDeque::new(),
                pending_tasks: Vec::new(),
            }),
        }
        Ok(id)
    }

    /// Adds an executor to its framework in REGISTERING state.
    pub async fn add_executor(
        &self,
        info: ExecutorInfo,
        container_id: ContainerId,
    ) -> Result<ExecutorId, StoreError> {
        let framework_id = info.framework_id.clone().ok_or_else(|| {
            StoreError::Invalid("Expecting 'executor_info.framework_id' to be present".to_string())
        })?;
        let executor_id = info.executor_id.clone().ok_or_else(|| {
            StoreError::Invalid("Expecting 'executor_info.executor_id' to be present".to_string())
        })?;

        let mut state = self.state.write().await;
        let framework = state
            .framework_mut(&framework_id)
            .ok_or(StoreError::FrameworkNotFound)?;
        if framework.executor_mut(&executor_id).is_some() {
            return Err(StoreError::Invalid(format!(
                "Executor {} already exists",
                executor_id
            )));
        }

        let user = info
            .command
            .as_ref()
            .and_then(|c| c.user.clone())
            .unwrap_or_else(|| framework.info.user.clone());

        framework.executors.push(Executor {
            id: executor_id.clone(),
            framework_id,
            info,
            container_id,
            user,
            state: ExecutorState::Registering,
            queued_tasks: Vec::new(),
            launched_tasks: Vec::new(),
            terminated_tasks: Vec::new(),
            completed_tasks: VecDeque::new(),
            subscription: None,
        });
        Ok(executor_id)
    }

    /// Records a task the framework has not yet assigned to an executor.
    pub async fn add_pending_task(
        &self,
        framework_id: &FrameworkId,
        task: TaskInfo,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .framework_mut(framework_id)
            .ok_or(StoreError::FrameworkNotFound)?
            .pending_tasks
            .push(task);
        Ok(())
    }

    /// Hands a task to an executor. A subscribed executor receives it
    /// immediately; otherwise it is queued until the executor subscribes.
    pub async fn queue_task(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        task: TaskInfo,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let framework = state
            .framework_mut(framework_id)
            .ok_or(StoreError::FrameworkNotFound)?;
        if let Some(task_id) = &task.task_id {
            framework
                .pending_tasks
                .retain(|pending| pending.task_id.as_ref() != Some(task_id));
        }
        let executor = framework
            .executor_mut(executor_id)
            .ok_or(StoreError::ExecutorNotFound)?;

        match (&executor.state, &executor.subscription) {
            (ExecutorState::Running, Some(subscription)) => {
                executor.launched_tasks.push(executor_task(
                    &task,
                    framework_id,
                    &executor.id,
                    TaskState::TaskStaging,
                ));
                subscription.send(Event::launch(task));
            }
            _ => executor.queued_tasks.push(task),
        }
        Ok(())
    }

    pub async fn executor_state(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<ExecutorState, StoreError> {
        let state = self.state.read().await;
        Ok(state.executor(framework_id, executor_id)?.state)
    }

    /// Attaches an event stream to the executor, replacing any previous one.
    ///
    /// SUBSCRIBED goes out first, then a LAUNCH for every queued task. Tasks
    /// the executor reports as unacknowledged but the agent does not know are
    /// adopted as launched.
    pub async fn subscribe(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        agent_id: &AgentId,
        unacknowledged_tasks: Vec<TaskInfo>,
        subscription: Subscription,
    ) -> Result<Subscribed, StoreError> {
        let mut state = self.state.write().await;
        let framework = state
            .framework_mut(framework_id)
            .ok_or(StoreError::FrameworkNotFound)?;
        let framework_info = framework.info.clone();
        let executor = framework
            .executor_mut(executor_id)
            .ok_or(StoreError::ExecutorNotFound)?;

        if executor.subscription.is_some() {
            tracing::info!(
                framework_id = %framework_id,
                executor_id = %executor_id,
                "Executor re-subscribed; closing previous event stream"
            );
        }

        subscription.send(Event::subscribed(event::Subscribed {
            executor_info: Some(executor.info.clone()),
            framework_info: Some(framework_info),
            agent_id: Some(agent_id.clone()),
            container_id: Some(executor.container_id.clone()),
        }));

        for task in unacknowledged_tasks {
            let known = task
                .task_id
                .as_ref()
                .is_some_and(|id| executor.knows_task(id));
            if !known {
                executor.launched_tasks.push(executor_task(
                    &task,
                    framework_id,
                    &executor.id,
                    TaskState::TaskStaging,
                ));
            }
        }

        let queued = std::mem::take(&mut executor.queued_tasks);
        let launched = queued.len();
        for task in queued {
            executor.launched_tasks.push(executor_task(
                &task,
                framework_id,
                &executor.id,
                TaskState::TaskStaging,
            ));
            subscription.send(Event::launch(task));
        }

        let subscription_id = subscription.id;
        executor.subscription = Some(subscription);
        executor.state = ExecutorState::Running;

        Ok(Subscribed {
            subscription_id,
            launched,
        })
    }

    /// Drops the executor's event stream if it is still `subscription_id`.
    pub async fn unsubscribe(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        subscription_id: Uuid,
    ) {
        let mut state = self.state.write().await;
        if let Ok(executor) = state.executor_mut(framework_id, executor_id) {
            if executor.subscription.as_ref().map(|s| s.id) == Some(subscription_id) {
                executor.subscription = None;
            }
        }
    }

    /// Applies a task status update and acknowledges it to the executor.
    pub async fn update_status(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let task_id = status.task_id.clone().ok_or_else(|| {
            StoreError::Invalid("Expecting 'status.task_id' to be present".to_string())
        })?;
        let task_state = TaskState::from_number(status.state).ok_or_else(|| {
            StoreError::Invalid(format!("Unknown task state {}", status.state))
        })?;

        let mut state = self.state.write().await;
        let executor = state.executor_mut(framework_id, executor_id)?;

        if let Some(index) = executor
            .queued_tasks
            .iter()
            .position(|q| q.task_id.as_ref() == Some(&task_id))
        {
            let info = executor.queued_tasks.remove(index);
            executor
                .launched_tasks
                .push(executor_task(&info, framework_id, executor_id, task_state));
        }

        match executor.find_task_mut(&task_id.value) {
            Some(task) => {
                task.state = task_state as i32;
                task.statuses.push(status.clone());
            }
            None => tracing::warn!(
                framework_id = %framework_id,
                executor_id = %executor_id,
                task_id = %task_id,
                "Status update for unknown task"
            ),
        }

        if task_state.is_terminal() {
            if let Some(index) = executor
                .launched_tasks
                .iter()
                .position(|t| t.task_id.as_ref() == Some(&task_id))
            {
                let task = executor.launched_tasks.remove(index);
                executor.terminated_tasks.push(task);
            }
        }

        if let (Some(subscription), Some(uuid)) = (&executor.subscription, status.uuid) {
            subscription.send(Event::acknowledged(task_id, uuid));
        }
        Ok(())
    }

    /// Pushes an event to a subscribed executor. False if it has no stream.
    pub async fn send_event(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        event: Event,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let executor = state.executor_mut(framework_id, executor_id)?;
        Ok(executor
            .subscription
            .as_ref()
            .is_some_and(|subscription| subscription.send(event)))
    }

    /// Moves an executor to its framework's completed list.
    pub async fn complete_executor(
        &self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
    ) -> Result<(), StoreError> {
        let limits = self.limits;
        let mut state = self.state.write().await;
        let framework = state
            .framework_mut(framework_id)
            .ok_or(StoreError::FrameworkNotFound)?;
        let index = framework
            .executors
            .iter()
            .position(|e| &e.id == executor_id)
            .ok_or(StoreError::ExecutorNotFound)?;

        let mut executor = framework.executors.remove(index);
        finish_executor(&mut executor, limits.tasks_per_executor);
        push_bounded(
            &mut framework.completed_executors,
            executor,
            limits.executors_per_framework,
        );
        Ok(())
    }

    /// Completes every executor of the framework and retires it.
    pub async fn complete_framework(&self, framework_id: &FrameworkId) -> Result<(), StoreError> {
        let limits = self.limits;
        let mut state = self.state.write().await;
        let index = state
            .frameworks
            .iter()
            .position(|f| &f.id == framework_id)
            .ok_or(StoreError::FrameworkNotFound)?;

        let mut framework = state.frameworks.remove(index);
        for mut executor in std::mem::take(&mut framework.executors) {
            finish_executor(&mut executor, limits.tasks_per_executor);
            push_bounded(
                &mut framework.completed_executors,
                executor,
                limits.executors_per_framework,
            );
        }
        framework.pending_tasks.clear();
        push_bounded(&mut state.completed_frameworks, framework, limits.frameworks);
        Ok(())
    }
}

fn finish_executor(executor: &mut Executor, task_limit: usize) {
    executor.state = ExecutorState::Terminated;
    executor.subscription = None;
    executor.queued_tasks.clear();
    let finished = std::mem::take(&mut executor.terminated_tasks)
        .into_iter()
        .chain(std::mem::take(&mut executor.launched_tasks));
    for task in finished {
        push_bounded(&mut executor.completed_tasks, task, task_limit);
    }
}
