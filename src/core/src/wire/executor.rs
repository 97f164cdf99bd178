//! Executor API messages: calls from an executor to its agent and the events
//! streamed back on a subscription.

include!(concat!(env!("OUT_DIR"), "/executor.rs"));

use super::mesos::{TaskId, TaskInfo};

impl Event {
    pub fn subscribed(subscribed: event::Subscribed) -> Self {
        Self {
            r#type: event::Type::Subscribed as i32,
            subscribed: Some(subscribed),
            ..Default::default()
        }
    }

    pub fn launch(task: TaskInfo) -> Self {
        Self {
            r#type: event::Type::Launch as i32,
            launch: Some(event::Launch { task: Some(task) }),
            ..Default::default()
        }
    }

    pub fn kill(task_id: TaskId) -> Self {
        Self {
            r#type: event::Type::Kill as i32,
            kill: Some(event::Kill {
                task_id: Some(task_id),
            }),
            ..Default::default()
        }
    }

    pub fn acknowledged(task_id: TaskId, uuid: Vec<u8>) -> Self {
        Self {
            r#type: event::Type::Acknowledged as i32,
            acknowledged: Some(event::Acknowledged {
                task_id: Some(task_id),
                uuid,
            }),
            ..Default::default()
        }
    }

    pub fn message(data: Vec<u8>) -> Self {
        Self {
            r#type: event::Type::Message as i32,
            message: Some(event::Message { data }),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            r#type: event::Type::Error as i32,
            error: Some(event::Error {
                message: message.into(),
            }),
            ..Default::default()
        }
    }

    pub fn shutdown() -> Self {
        Self {
            r#type: event::Type::Shutdown as i32,
            ..Default::default()
        }
    }
}
