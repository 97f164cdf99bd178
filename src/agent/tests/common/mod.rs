//! Shared fixtures for the HTTP API tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tower::ServiceExt;

use a3s_agent::authorization::{Action, Authorizer, Object, ObjectApprover, Subject};
use a3s_agent::containerizer::{
    Connection, ContainerTermination, Containerizer, IoBody, IoRequest, IoResponse, LaunchSpec,
};
use a3s_agent::{AgentContext, AgentServer, LoggingControl};
use a3s_agent_core::config::AgentConfig;
use a3s_agent_core::error::{AgentError, Result};
use a3s_agent_core::pipe::pipe;
use a3s_agent_core::recordio::{self, Decoder, DEFAULT_MAX_RECORD_SIZE};
use a3s_agent_core::wire::agent::{process_io, ProcessIo};
use a3s_agent_core::wire::mesos::{
    CommandInfo, ContainerId, ContainerStatus, ExecutorId, ExecutorInfo, FrameworkId,
    FrameworkInfo, ResourceStatistics, TaskId, TaskInfo,
};

pub fn framework_info(id: &str) -> FrameworkInfo {
    FrameworkInfo {
        user: "root".to_string(),
        name: format!("{}-name", id),
        id: Some(FrameworkId::from(id)),
        ..Default::default()
    }
}

pub fn executor_info(framework: &str, id: &str) -> ExecutorInfo {
    ExecutorInfo {
        executor_id: Some(ExecutorId::from(id)),
        framework_id: Some(FrameworkId::from(framework)),
        command: Some(CommandInfo::shell_command("run-executor")),
        name: Some(format!("{}-executor", id)),
        ..Default::default()
    }
}

pub fn task_info(id: &str) -> TaskInfo {
    TaskInfo {
        name: id.to_string(),
        task_id: Some(TaskId::from(id)),
        ..Default::default()
    }
}

/// Records runtime calls and answers attaches with a fixed output stream.
/// Attached input records are kept, decoded as JSON, in arrival order.
#[derive(Default)]
pub struct MockContainerizer {
    pub fail_launch: bool,
    /// Keeps output streams open until the reader goes away.
    pub hold_output: bool,
    pub launches: AtomicUsize,
    pub destroys: AtomicUsize,
    pub attaches: AtomicUsize,
    pub output: Vec<ProcessIo>,
    pub input: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockContainerizer {
    pub fn with_output(lines: &[&str]) -> Self {
        Self {
            output: lines
                .iter()
                .map(|line| ProcessIo::data(process_io::data::Type::Stdout, line.as_bytes()))
                .collect(),
            ..Default::default()
        }
    }

    /// Output that never reaches EOF on its own.
    pub fn with_held_output(lines: &[&str]) -> Self {
        Self {
            hold_output: true,
            ..Self::with_output(lines)
        }
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Default::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn input(&self) -> Vec<serde_json::Value> {
        self.input.lock().clone()
    }
}

struct MockConnection {
    output: Vec<ProcessIo>,
    hold_output: bool,
    input: Arc<Mutex<Vec<serde_json::Value>>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(self: Box<Self>, request: IoRequest) -> Result<IoResponse> {
        if let IoBody::Pipe(mut reader) = request.body {
            let body = reader.read_all().await?;
            self.input.lock().extend(json_records(&body));
            return Ok(IoResponse::empty(StatusCode::OK));
        }

        let mut body = BytesMut::new();
        for record in &self.output {
            body.extend_from_slice(&recordio::encode_message(request.accept, record)?);
        }
        if !self.hold_output {
            return Ok(IoResponse::ok(request.accept, IoBody::Full(body.freeze())));
        }

        let (reader, writer) = pipe();
        tokio::spawn(async move {
            if writer.write(body.freeze()).await.is_ok() {
                writer.reader_closed().await;
            }
        });
        Ok(IoResponse::ok(request.accept, IoBody::Pipe(reader)))
    }
}

#[async_trait]
impl Containerizer for MockContainerizer {
    async fn launch(&self, _spec: LaunchSpec) -> Result<bool> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(AgentError::ContainerizerError(
                "Failed to start process".to_string(),
            ));
        }
        Ok(true)
    }

    async fn wait(&self, _container_id: &ContainerId) -> Result<Option<ContainerTermination>> {
        Ok(Some(ContainerTermination {
            status: Some(0),
            message: None,
        }))
    }

    async fn destroy(&self, _container_id: &ContainerId) -> Result<bool> {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn attach(&self, _container_id: &ContainerId) -> Result<Box<dyn Connection>> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            output: self.output.clone(),
            hold_output: self.hold_output,
            input: self.input.clone(),
        }))
    }

    async fn status(&self, _container_id: &ContainerId) -> Result<ContainerStatus> {
        Ok(ContainerStatus::default())
    }

    async fn usage(&self, _container_id: &ContainerId) -> Result<ResourceStatistics> {
        Ok(ResourceStatistics::default())
    }
}

struct Fixed(bool);

impl ObjectApprover for Fixed {
    fn approved(&self, _object: &Object<'_>) -> Result<bool> {
        Ok(self.0)
    }
}

struct HideFramework(String);

impl ObjectApprover for HideFramework {
    fn approved(&self, object: &Object<'_>) -> Result<bool> {
        Ok(object.framework_info.map(|f| f.name.as_str()) != Some(self.0.as_str()))
    }
}

/// Denies the listed actions, allows everything else.
#[derive(Default)]
pub struct DenyActions {
    pub denied: HashSet<Action>,
    pub hidden_framework: Option<String>,
}

impl DenyActions {
    pub fn new(denied: &[Action]) -> Self {
        Self {
            denied: denied.iter().copied().collect(),
            hidden_framework: None,
        }
    }

    /// Hides one framework from every view action.
    pub fn hiding(framework_name: &str) -> Self {
        Self {
            denied: HashSet::new(),
            hidden_framework: Some(framework_name.to_string()),
        }
    }
}

#[async_trait]
impl Authorizer for DenyActions {
    async fn get_object_approver(
        &self,
        _subject: &Subject,
        action: Action,
    ) -> Result<Arc<dyn ObjectApprover>> {
        if self.denied.contains(&action) {
            return Ok(Arc::new(Fixed(false)));
        }
        match (&self.hidden_framework, action) {
            (
                Some(name),
                Action::ViewFramework | Action::ViewExecutor | Action::ViewTask,
            ) => Ok(Arc::new(HideFramework(name.clone()))),
            _ => Ok(Arc::new(Fixed(true))),
        }
    }
}

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub runtime: Arc<MockContainerizer>,
    pub context: Arc<AgentContext>,
    pub router: Router,
}

/// An agent with framework `fw` running executor `ex` in container `exec`.
pub async fn harness(
    runtime: MockContainerizer,
    authorizer: Option<Arc<dyn Authorizer>>,
) -> Harness {
    harness_with(AgentConfig::default(), runtime, authorizer).await
}

pub async fn harness_with(
    mut config: AgentConfig,
    runtime: MockContainerizer,
    authorizer: Option<Arc<dyn Authorizer>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    config.work_dir = dir.path().to_path_buf();

    let runtime = Arc::new(runtime);
    let context = AgentContext::new(
        config,
        runtime.clone(),
        authorizer,
        LoggingControl::detached(),
    )
    .unwrap();

    context.store.add_framework(framework_info("fw")).await.unwrap();
    context
        .store
        .add_executor(executor_info("fw", "ex"), ContainerId::new("exec"))
        .await
        .unwrap();

    let server = AgentServer::new(context);
    let router = server.router();
    Harness {
        _dir: dir,
        runtime,
        context: server.context(),
        router,
    }
}

pub fn nested_id(parent: &str, child: &str) -> serde_json::Value {
    serde_json::json!({ "value": child, "parent": { "value": parent } })
}

pub fn json_call(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .header("accept", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Splits a RecordIO body into JSON records.
pub fn json_records(body: &[u8]) -> Vec<serde_json::Value> {
    let mut decoder = Decoder::new(DEFAULT_MAX_RECORD_SIZE);
    let records = decoder.decode(body).unwrap();
    decoder.finish().unwrap();
    records
        .iter()
        .map(|record| serde_json::from_slice(record).unwrap())
        .collect()
}

pub async fn expect_status(router: &Router, request: Request<Body>, status: StatusCode) -> String {
    let response = send(router, request).await;
    let actual = response.status();
    let text = body_text(response).await;
    assert_eq!(actual, status, "unexpected status, body: {}", text);
    text
}
