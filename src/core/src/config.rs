use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{AgentError, Result};
use crate::recordio::DEFAULT_MAX_RECORD_SIZE;
use crate::wire::mesos::Flag;

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent identifier reported to executors
    pub agent_id: String,

    /// Hostname advertised in state snapshots
    pub hostname: String,

    /// HTTP listen address
    pub listen: String,

    /// Work directory; executor sandboxes live beneath it
    pub work_dir: PathBuf,

    /// Completed frameworks retained for state queries
    pub max_completed_frameworks: usize,

    /// Completed executors retained per framework
    pub max_completed_executors_per_framework: usize,

    /// Completed tasks retained per executor
    pub max_completed_tasks_per_executor: usize,

    /// Largest RecordIO record accepted on streaming endpoints
    pub max_record_size: usize,

    /// Require HTTP basic authentication on the operator API
    pub authenticate_http: bool,

    /// Credentials accepted by HTTP authentication
    pub credentials: Vec<Credential>,

    /// Static access control lists; authorization is disabled when absent
    pub acls: Option<AclConfig>,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-local".to_string(),
            hostname: "localhost".to_string(),
            listen: "0.0.0.0:5051".to_string(),
            work_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".a3s")
                .join("agent"),
            max_completed_frameworks: 50,
            max_completed_executors_per_framework: 150,
            max_completed_tasks_per_executor: 200,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            authenticate_http: false,
            credentials: Vec::new(),
            acls: None,
            log_level: LogLevel::Info,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: AgentConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.is_empty() {
            return Err(AgentError::ConfigError("agent_id must not be empty".to_string()));
        }
        if self.max_record_size == 0 {
            return Err(AgentError::ConfigError(
                "max_record_size must be positive".to_string(),
            ));
        }
        if self.authenticate_http && self.credentials.is_empty() {
            return Err(AgentError::ConfigError(
                "authenticate_http requires at least one credential".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective settings as name/value flags. Secrets are left out.
    pub fn flags(&self) -> Vec<Flag> {
        let mut flags = BTreeMap::new();
        flags.insert("agent_id", self.agent_id.clone());
        flags.insert("hostname", self.hostname.clone());
        flags.insert("listen", self.listen.clone());
        flags.insert("work_dir", self.work_dir.display().to_string());
        flags.insert(
            "max_completed_frameworks",
            self.max_completed_frameworks.to_string(),
        );
        flags.insert(
            "max_completed_executors_per_framework",
            self.max_completed_executors_per_framework.to_string(),
        );
        flags.insert(
            "max_completed_tasks_per_executor",
            self.max_completed_tasks_per_executor.to_string(),
        );
        flags.insert("max_record_size", self.max_record_size.to_string());
        flags.insert("authenticate_http", self.authenticate_http.to_string());
        flags.insert("authorization", self.acls.is_some().to_string());
        flags.insert("log_level", self.log_level.as_str().to_string());

        flags
            .into_iter()
            .map(|(name, value)| Flag {
                name: name.to_string(),
                value: Some(value),
            })
            .collect()
    }
}

/// A principal and its secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub principal: String,
    pub secret: String,
}

/// Static access control: which principals may perform which actions.
///
/// Action names match the authorization action names, for example
/// `LAUNCH_NESTED_CONTAINER` or `VIEW_FRAMEWORK`. The principal `*` matches
/// every caller, including anonymous ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Principal -> permitted actions
    pub permissions: BTreeMap<String, Vec<String>>,

    /// Whether actions without a matching entry are allowed
    pub permissive: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
