//! Authorization gate.
//!
//! An [`Authorizer`] hands out one [`ObjectApprover`] per (subject, action).
//! Handlers fetch the approvers they need up front, then ask them about each
//! object synchronously. With no authorizer configured every object is
//! approved through the same code path.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use a3s_agent_core::config::AclConfig;
use a3s_agent_core::error::{AgentError, Result};
use a3s_agent_core::wire::mesos::{
    CommandInfo, ContainerId, ExecutorInfo, FrameworkInfo, Task, TaskInfo,
};

use crate::error::ApiError;

/// Principal wildcard in ACLs.
const ANY_PRINCIPAL: &str = "*";

/// Operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ViewFlags,
    ViewFramework,
    ViewTask,
    ViewExecutor,
    ViewContainer,
    SetLogLevel,
    LaunchNestedContainer,
    WaitNestedContainer,
    KillNestedContainer,
    LaunchNestedContainerSession,
    AccessSandbox,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::ViewFlags,
        Action::ViewFramework,
        Action::ViewTask,
        Action::ViewExecutor,
        Action::ViewContainer,
        Action::SetLogLevel,
        Action::LaunchNestedContainer,
        Action::WaitNestedContainer,
        Action::KillNestedContainer,
        Action::LaunchNestedContainerSession,
        Action::AccessSandbox,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewFlags => "VIEW_FLAGS",
            Action::ViewFramework => "VIEW_FRAMEWORK",
            Action::ViewTask => "VIEW_TASK",
            Action::ViewExecutor => "VIEW_EXECUTOR",
            Action::ViewContainer => "VIEW_CONTAINER",
            Action::SetLogLevel => "SET_LOG_LEVEL",
            Action::LaunchNestedContainer => "LAUNCH_NESTED_CONTAINER",
            Action::WaitNestedContainer => "WAIT_NESTED_CONTAINER",
            Action::KillNestedContainer => "KILL_NESTED_CONTAINER",
            Action::LaunchNestedContainerSession => "LAUNCH_NESTED_CONTAINER_SESSION",
            Action::AccessSandbox => "ACCESS_SANDBOX",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| AgentError::ConfigError(format!("Unknown authorization action '{}'", s)))
    }
}

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    pub principal: Option<String>,
}

impl Subject {
    pub fn new(principal: Option<&str>) -> Self {
        Self {
            principal: principal.map(str::to_string),
        }
    }
}

/// The entity a decision is about. Only the fields relevant to the action
/// are set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Object<'a> {
    pub framework_info: Option<&'a FrameworkInfo>,
    pub executor_info: Option<&'a ExecutorInfo>,
    pub command_info: Option<&'a CommandInfo>,
    pub task_info: Option<&'a TaskInfo>,
    pub task: Option<&'a Task>,
    pub container_id: Option<&'a ContainerId>,
}

/// A decision function bound to one subject and action.
pub trait ObjectApprover: Send + Sync {
    fn approved(&self, object: &Object<'_>) -> Result<bool>;
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn get_object_approver(
        &self,
        subject: &Subject,
        action: Action,
    ) -> Result<Arc<dyn ObjectApprover>>;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptingObjectApprover;

impl ObjectApprover for AcceptingObjectApprover {
    fn approved(&self, _object: &Object<'_>) -> Result<bool> {
        Ok(true)
    }
}

/// Gives the same answer for every object.
#[derive(Debug, Clone, Copy)]
struct FixedApprover(bool);

impl ObjectApprover for FixedApprover {
    fn approved(&self, _object: &Object<'_>) -> Result<bool> {
        Ok(self.0)
    }
}

/// Static principal -> actions allow-lists from the agent configuration.
#[derive(Debug, Clone)]
pub struct AclAuthorizer {
    acls: AclConfig,
}

impl AclAuthorizer {
    /// Builds the authorizer, rejecting unknown action names.
    pub fn new(acls: AclConfig) -> Result<Self> {
        for actions in acls.permissions.values() {
            for action in actions {
                action.parse::<Action>()?;
            }
        }
        Ok(Self { acls })
    }

    fn permits(&self, principal: &str, action: Action) -> Option<bool> {
        self.acls
            .permissions
            .get(principal)
            .map(|actions| actions.iter().any(|a| a == action.as_str()))
    }

    fn decide(&self, subject: &Subject, action: Action) -> bool {
        let own = subject
            .principal
            .as_deref()
            .and_then(|principal| self.permits(principal, action));
        match (own, self.permits(ANY_PRINCIPAL, action)) {
            (Some(true), _) | (_, Some(true)) => true,
            (Some(false), _) | (None, Some(false)) => false,
            (None, None) => self.acls.permissive,
        }
    }
}

#[async_trait]
impl Authorizer for AclAuthorizer {
    async fn get_object_approver(
        &self,
        subject: &Subject,
        action: Action,
    ) -> Result<Arc<dyn ObjectApprover>> {
        let allowed = self.decide(subject, action);
        tracing::trace!(
            principal = ?subject.principal,
            action = %action,
            allowed,
            "ACL decision"
        );
        Ok(Arc::new(FixedApprover(allowed)))
    }
}

/// Entry point handlers use to obtain approvers.
#[derive(Clone, Default)]
pub struct AuthorizationGate {
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl AuthorizationGate {
    pub fn new(authorizer: Option<Arc<dyn Authorizer>>) -> Self {
        Self { authorizer }
    }

    /// A gate that approves everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.authorizer.is_some()
    }

    pub async fn approver(
        &self,
        principal: Option<&str>,
        action: Action,
    ) -> Result<Arc<dyn ObjectApprover>> {
        match &self.authorizer {
            Some(authorizer) => {
                authorizer
                    .get_object_approver(&Subject::new(principal), action)
                    .await
            }
            None => Ok(Arc::new(AcceptingObjectApprover)),
        }
    }

    /// One-shot decision for a single object.
    pub async fn authorize(
        &self,
        principal: Option<&str>,
        action: Action,
        object: &Object<'_>,
    ) -> Result<bool> {
        self.approver(principal, action).await?.approved(object)
    }

    /// The four approvers every state listing needs, fetched concurrently.
    pub async fn view_approvers(&self, principal: Option<&str>) -> Result<ViewApprovers> {
        let (frameworks, tasks, executors, flags) = tokio::try_join!(
            self.approver(principal, Action::ViewFramework),
            self.approver(principal, Action::ViewTask),
            self.approver(principal, Action::ViewExecutor),
            self.approver(principal, Action::ViewFlags),
        )?;
        Ok(ViewApprovers {
            frameworks,
            tasks,
            executors,
            flags,
        })
    }
}

/// Like [`AuthorizationGate::authorize`], answering a denial with 403 and a
/// failed decision with 500.
pub async fn authorize(
    gate: &AuthorizationGate,
    principal: Option<&str>,
    action: Action,
    object: Object<'_>,
) -> std::result::Result<(), ApiError> {
    if gate
        .authorize(principal, action, &object)
        .await
        .map_err(ApiError::internal)?
    {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Principal {:?} is not authorized to {}",
            principal.unwrap_or("<anonymous>"),
            action
        )))
    }
}

/// Approvers for filtered state enumeration.
#[derive(Clone)]
pub struct ViewApprovers {
    pub frameworks: Arc<dyn ObjectApprover>,
    pub tasks: Arc<dyn ObjectApprover>,
    pub executors: Arc<dyn ObjectApprover>,
    pub flags: Arc<dyn ObjectApprover>,
}

fn decide(approver: &dyn ObjectApprover, object: Object<'_>, what: &str) -> bool {
    match approver.approved(&object) {
        Ok(approved) => approved,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to authorize {}; treating as denied", what);
            false
        }
    }
}

pub fn approve_view_framework(approver: &dyn ObjectApprover, framework: &FrameworkInfo) -> bool {
    decide(
        approver,
        Object {
            framework_info: Some(framework),
            ..Default::default()
        },
        "framework view",
    )
}

pub fn approve_view_executor(
    approver: &dyn ObjectApprover,
    executor: &ExecutorInfo,
    framework: &FrameworkInfo,
) -> bool {
    decide(
        approver,
        Object {
            executor_info: Some(executor),
            framework_info: Some(framework),
            ..Default::default()
        },
        "executor view",
    )
}

pub fn approve_view_task(
    approver: &dyn ObjectApprover,
    task: &Task,
    framework: &FrameworkInfo,
) -> bool {
    decide(
        approver,
        Object {
            task: Some(task),
            framework_info: Some(framework),
            ..Default::default()
        },
        "task view",
    )
}

pub fn approve_view_task_info(
    approver: &dyn ObjectApprover,
    task: &TaskInfo,
    framework: &FrameworkInfo,
) -> bool {
    decide(
        approver,
        Object {
            task_info: Some(task),
            framework_info: Some(framework),
            ..Default::default()
        },
        "task view",
    )
}

pub fn approve_view_flags(approver: &dyn ObjectApprover) -> bool {
    decide(approver, Object::default(), "flags view")
}
