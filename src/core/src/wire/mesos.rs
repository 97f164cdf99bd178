//! Common agent protocol types: identifiers, framework, executor and task
//! descriptions, container status.

include!(concat!(env!("OUT_DIR"), "/mesos.rs"));

impl ContainerId {
    /// A top-level container id.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: None,
        }
    }

    /// A container nested under `parent`.
    pub fn nested(parent: ContainerId, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: Some(Box::new(parent)),
        }
    }

    /// Number of ancestors above this container.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_deref();
        while let Some(parent) = current {
            depth += 1;
            current = parent.parent.as_deref();
        }
        depth
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{}.", parent)?;
        }
        f.write_str(&self.value)
    }
}

macro_rules! impl_id_display {
    ($($id:ty),+) => {
        $(
            impl std::fmt::Display for $id {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.value)
                }
            }

            impl From<&str> for $id {
                fn from(value: &str) -> Self {
                    Self { value: value.to_string() }
                }
            }
        )+
    };
}

impl_id_display!(FrameworkId, ExecutorId, AgentId, TaskId);

impl CommandInfo {
    /// A shell command line.
    pub fn shell_command(value: impl Into<String>) -> Self {
        Self {
            shell: Some(true),
            value: Some(value.into()),
            ..Default::default()
        }
    }
}

impl TaskState {
    /// Whether no further transitions follow this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::TaskFinished
                | TaskState::TaskFailed
                | TaskState::TaskKilled
                | TaskState::TaskError
                | TaskState::TaskLost
        )
    }
}

impl Task {
    /// Builds the agent-side record for a task that has not started yet.
    pub fn from_info(info: &TaskInfo, framework_id: &FrameworkId, state: TaskState) -> Self {
        Self {
            name: info.name.clone(),
            task_id: info.task_id.clone(),
            framework_id: Some(framework_id.clone()),
            executor_id: info.executor.as_ref().and_then(|e| e.executor_id.clone()),
            agent_id: info.agent_id.clone(),
            state: state as i32,
            statuses: Vec::new(),
            user: info.command.as_ref().and_then(|c| c.user.clone()),
        }
    }
}

impl DurationInfo {
    pub fn from_duration(duration: std::time::Duration) -> Self {
        Self {
            nanoseconds: i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX),
        }
    }

    /// Negative durations clamp to zero.
    pub fn to_duration(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(u64::try_from(self.nanoseconds).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_display() {
        let parent = ContainerId::new("exec");
        let child = ContainerId::nested(parent, "debug");
        assert_eq!(child.to_string(), "exec.debug");
    }

    #[test]
    fn test_container_id_depth() {
        let root = ContainerId::new("a");
        let child = ContainerId::nested(root.clone(), "b");
        let grandchild = ContainerId::nested(child.clone(), "c");
        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
    }

    #[test]
    fn test_container_id_json_omits_missing_parent() {
        let json = serde_json::to_value(ContainerId::new("x")).unwrap();
        assert_eq!(json, serde_json::json!({ "value": "x" }));
    }

    #[test]
    fn test_container_id_protobuf_round_trip() {
        use prost::Message;

        let id = ContainerId::nested(ContainerId::new("exec"), "child");
        let bytes = id.encode_to_vec();
        let decoded = ContainerId::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_shell_command_sets_shell_flag() {
        let command = CommandInfo::shell_command("echo hi");
        assert!(command.shell());
        assert_eq!(command.value(), "echo hi");

        let json = serde_json::to_value(&command).unwrap();
        assert_eq!(json, serde_json::json!({ "shell": true, "value": "echo hi" }));
    }

    #[test]
    fn test_unset_container_type_is_unknown() {
        let info: ContainerInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info.r#type(), container_info::Type::Unknown);

        let docker: ContainerInfo = serde_json::from_str(r#"{"type":"DOCKER"}"#).unwrap();
        assert_eq!(docker.r#type(), container_info::Type::Docker);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::TaskFinished.is_terminal());
        assert!(TaskState::TaskLost.is_terminal());
        assert!(!TaskState::TaskRunning.is_terminal());
        assert!(!TaskState::TaskStaging.is_terminal());
    }

    #[test]
    fn test_duration_info_conversion() {
        let info = DurationInfo::from_duration(std::time::Duration::from_millis(1500));
        assert_eq!(info.nanoseconds, 1_500_000_000);
        assert_eq!(info.to_duration(), std::time::Duration::from_millis(1500));

        let negative = DurationInfo { nanoseconds: -5 };
        assert_eq!(negative.to_duration(), std::time::Duration::ZERO);
    }

    #[test]
    fn test_task_from_info() {
        let info = TaskInfo {
            name: "t".to_string(),
            task_id: Some(TaskId::from("t1")),
            executor: Some(ExecutorInfo {
                executor_id: Some(ExecutorId::from("e1")),
                ..Default::default()
            }),
            ..Default::default()
        };
        let task = Task::from_info(&info, &FrameworkId::from("f1"), TaskState::TaskStaging);
        assert_eq!(task.state, TaskState::TaskStaging as i32);
        assert_eq!(task.executor_id, Some(ExecutorId::from("e1")));
        assert_eq!(task.framework_id, Some(FrameworkId::from("f1")));
    }
}
