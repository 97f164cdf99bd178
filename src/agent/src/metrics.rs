//! Prometheus metrics for the agent API.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `agent_api_calls_total` | Counter | `call`, `status` |
//! | `agent_executor_calls_total` | Counter | `call` |
//! | `agent_nested_container_sessions_active` | Gauge | |
//! | `agent_nested_container_destroys_total` | Counter | `reason` |
//!
//! GET_METRICS flattens the gathered families into `{name, value}` pairs.
//! A labelled sample is named `<family>/<label value>/...` in label order.

use std::time::Duration;

use prometheus::proto::{MetricFamily, MetricType};
use prometheus::{CounterVec, Gauge, Opts, Registry};
use thiserror::Error;

use a3s_agent_core::wire::mesos::Metric;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("timed out after {0:?} while collecting metrics")]
    Timeout(Duration),

    #[error("metrics collection failed: {0}")]
    CollectionFailed(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

/// Why a nested container was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    LaunchFailed,
    Killed,
    SessionEnded,
    SessionFailed,
}

impl DestroyReason {
    fn as_str(&self) -> &'static str {
        match self {
            DestroyReason::LaunchFailed => "launch_failed",
            DestroyReason::Killed => "killed",
            DestroyReason::SessionEnded => "session_ended",
            DestroyReason::SessionFailed => "session_failed",
        }
    }
}

#[derive(Clone)]
pub struct AgentMetrics {
    registry: Registry,
    api_calls_total: CounterVec,
    executor_calls_total: CounterVec,
    sessions_active: Gauge,
    destroys_total: CounterVec,
}

impl AgentMetrics {
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();

        let api_calls_total = CounterVec::new(
            Opts::new("agent_api_calls_total", "Agent API calls by kind and status"),
            &["call", "status"],
        )?;
        registry.register(Box::new(api_calls_total.clone()))?;

        let executor_calls_total = CounterVec::new(
            Opts::new("agent_executor_calls_total", "Executor API calls by kind"),
            &["call"],
        )?;
        registry.register(Box::new(executor_calls_total.clone()))?;

        let sessions_active = Gauge::new(
            "agent_nested_container_sessions_active",
            "Nested container sessions with an attached output stream",
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        let destroys_total = CounterVec::new(
            Opts::new(
                "agent_nested_container_destroys_total",
                "Nested container destroys issued by the agent",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(destroys_total.clone()))?;

        Ok(Self {
            registry,
            api_calls_total,
            executor_calls_total,
            sessions_active,
            destroys_total,
        })
    }

    pub fn api_call(&self, call: &str, status: u16) {
        self.api_calls_total
            .with_label_values(&[call, &status.to_string()])
            .inc();
    }

    pub fn executor_call(&self, call: &str) {
        self.executor_calls_total.with_label_values(&[call]).inc();
    }

    pub fn session_started(&self) {
        self.sessions_active.inc();
    }

    pub fn session_ended(&self) {
        self.sessions_active.dec();
    }

    pub fn container_destroyed(&self, reason: DestroyReason) {
        self.destroys_total
            .with_label_values(&[reason.as_str()])
            .inc();
    }

    /// Gathers every family, giving up after `timeout` if one is set.
    pub async fn snapshot(&self, timeout: Option<Duration>) -> MetricsResult<Vec<Metric>> {
        let registry = self.registry.clone();
        let gather = tokio::task::spawn_blocking(move || registry.gather());

        let families = match timeout {
            Some(limit) => tokio::time::timeout(limit, gather)
                .await
                .map_err(|_| MetricsError::Timeout(limit))?,
            None => gather.await,
        }
        .map_err(|e| MetricsError::CollectionFailed(e.to_string()))?;

        Ok(flatten(&families))
    }
}

fn flatten(families: &[MetricFamily]) -> Vec<Metric> {
    let mut metrics = Vec::new();
    for family in families {
        for sample in family.get_metric() {
            let mut name = family.get_name().to_string();
            for label in sample.get_label() {
                name.push('/');
                name.push_str(label.get_value());
            }

            let value = match family.get_field_type() {
                MetricType::COUNTER => sample.get_counter().get_value(),
                MetricType::GAUGE => sample.get_gauge().get_value(),
                MetricType::UNTYPED => sample.get_untyped().get_value(),
                MetricType::HISTOGRAM => sample.get_histogram().get_sample_count() as f64,
                MetricType::SUMMARY => sample.get_summary().get_sample_count() as f64,
            };

            metrics.push(Metric {
                name,
                value: Some(value),
            });
        }
    }
    metrics
}
