//! Runtime control of log verbosity.
//!
//! The process filter sits behind a `tracing_subscriber::reload` layer.
//! Levels are numeric: 0 is the configured base filter, 1 is `debug`, and 2
//! or more is `trace`. A temporary level reverts to the base filter after
//! its duration unless a newer change superseded it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::{reload, EnvFilter, Registry};

use a3s_agent_core::error::{AgentError, Result};

pub type FilterHandle = reload::Handle<EnvFilter, Registry>;

#[derive(Debug, Default)]
struct LevelState {
    level: u32,
    generation: u64,
}

struct Inner {
    handle: Option<FilterHandle>,
    base: String,
    state: Mutex<LevelState>,
}

/// Shared handle for GET_LOGGING_LEVEL / SET_LOGGING_LEVEL.
#[derive(Clone)]
pub struct LoggingControl {
    inner: Arc<Inner>,
}

impl LoggingControl {
    /// `base` is the filter directive the process started with.
    pub fn new(handle: FilterHandle, base: impl Into<String>) -> Self {
        Self::build(Some(handle), base.into())
    }

    /// Tracks levels without a subscriber to reload, as in tests.
    pub fn detached() -> Self {
        Self::build(None, "info".to_string())
    }

    fn build(handle: Option<FilterHandle>, base: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                base,
                state: Mutex::new(LevelState::default()),
            }),
        }
    }

    pub fn level(&self) -> u32 {
        self.inner.state.lock().level
    }

    /// Switches to `level` for `duration`, then back to the base filter.
    pub fn set_level(&self, level: u32, duration: Duration) -> Result<()> {
        let generation = {
            let mut state = self.inner.state.lock();
            self.apply(level)?;
            state.level = level;
            state.generation += 1;
            state.generation
        };

        tracing::info!(level, duration = ?duration, "Logging level changed");

        if level != 0 {
            let control = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                control.revert(generation);
            });
        }
        Ok(())
    }

    fn revert(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return;
        }
        match self.apply(0) {
            Ok(()) => {
                state.level = 0;
                tracing::info!("Logging level reverted");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to revert logging level"),
        }
    }

    fn apply(&self, level: u32) -> Result<()> {
        let Some(handle) = &self.inner.handle else {
            return Ok(());
        };
        let directive = match level {
            0 => self.inner.base.as_str(),
            1 => "debug",
            _ => "trace",
        };
        let filter = EnvFilter::try_new(directive)
            .map_err(|e| AgentError::ConfigError(format!("Invalid log filter: {}", e)))?;
        handle
            .reload(filter)
            .map_err(|e| AgentError::Other(format!("Failed to reload log filter: {}", e)))
    }
}
