//! Process-backed container runtime.
//!
//! Each container is one child process started through `tokio::process`,
//! running in its own sandbox directory under the agent work dir. Standard
//! output and error are published as ProcessIO records to every attached
//! output stream; attached input is written to the child's stdin.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::TryStreamExt;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Notify};

use a3s_agent_core::content::{self, ContentType};
use a3s_agent_core::error::{AgentError, Result};
use a3s_agent_core::pipe::{pipe, PipeWriter};
use a3s_agent_core::recordio::{self, RecordReader};
use a3s_agent_core::wire::agent::{call, process_io, Call, ProcessIo};
use a3s_agent_core::wire::mesos::{
    container_info, CommandInfo, ContainerId, ContainerStatus, ResourceStatistics,
};

use super::{
    Connection, ContainerTermination, Containerizer, IoBody, IoRequest, IoResponse, LaunchSpec,
};

/// Bytes read from a child's output per record.
const OUTPUT_CHUNK_SIZE: usize = 4096;

/// Output records replayed to late attachers.
const OUTPUT_BACKLOG: usize = 1024;

/// Exited containers kept for `wait` and late attaches before the oldest is
/// dropped.
const EXITED_RETENTION: usize = 64;

#[derive(Default)]
struct OutputLog {
    records: VecDeque<ProcessIo>,
    subscribers: Vec<mpsc::Sender<ProcessIo>>,
    closed: bool,
}

/// Fans child output out to attached streams. Records published before an
/// attach are replayed from a bounded backlog. Each attached stream holds
/// at most one undelivered record, so a slow reader stalls the publisher.
#[derive(Default)]
struct OutputFanout {
    log: Mutex<OutputLog>,
}

impl OutputFanout {
    async fn publish(&self, record: ProcessIo) {
        let subscribers = {
            let mut log = self.log.lock();
            if log.records.len() == OUTPUT_BACKLOG {
                log.records.pop_front();
            }
            log.records.push_back(record.clone());
            log.subscribers.clone()
        };

        let mut dropped = false;
        for tx in &subscribers {
            dropped |= tx.send(record.clone()).await.is_err();
        }
        if dropped {
            self.log.lock().subscribers.retain(|tx| !tx.is_closed());
        }
    }

    fn close(&self) {
        let mut log = self.log.lock();
        log.closed = true;
        log.subscribers.clear();
    }

    fn subscribe(&self) -> OutputSubscription {
        let (tx, rx) = mpsc::channel(1);
        let mut log = self.log.lock();
        let backlog = log.records.clone();
        if !log.closed {
            log.subscribers.push(tx);
        }
        OutputSubscription { backlog, rx }
    }
}

/// One attached output stream: the backlog snapshot, then live records.
struct OutputSubscription {
    backlog: VecDeque<ProcessIo>,
    rx: mpsc::Receiver<ProcessIo>,
}

impl OutputSubscription {
    async fn next(&mut self) -> Option<ProcessIo> {
        match self.backlog.pop_front() {
            Some(record) => Some(record),
            None => self.rx.recv().await,
        }
    }
}

/// Live and recently exited containers.
struct ContainerTable {
    containers: DashMap<ContainerId, Arc<LocalContainer>>,
    exited: Mutex<VecDeque<ContainerId>>,
    retention: usize,
}

impl ContainerTable {
    fn new(retention: usize) -> Self {
        Self {
            containers: DashMap::new(),
            exited: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Records that `container` exited, evicting the oldest exited entries
    /// beyond the retention limit.
    fn retire(&self, container_id: &ContainerId, container: &Arc<LocalContainer>) {
        let current = self
            .containers
            .get(container_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), container));
        if !current {
            return;
        }

        let evicted: Vec<ContainerId> = {
            let mut exited = self.exited.lock();
            exited.push_back(container_id.clone());
            let excess = exited.len().saturating_sub(self.retention);
            exited.drain(..excess).collect()
        };
        for id in evicted {
            if self
                .containers
                .remove_if(&id, |_, c| c.is_terminated())
                .is_some()
            {
                tracing::debug!(container_id = %id, "Evicted exited container");
            }
        }
    }

    fn remove(&self, container_id: &ContainerId) -> Option<Arc<LocalContainer>> {
        let (_, container) = self.containers.remove(container_id)?;
        self.exited.lock().retain(|id| id != container_id);
        Some(container)
    }
}

struct LocalContainer {
    pid: Option<u32>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    output: OutputFanout,
    termination: watch::Receiver<Option<ContainerTermination>>,
    kill: Notify,
}

impl LocalContainer {
    fn is_terminated(&self) -> bool {
        self.termination.borrow().is_some()
    }

    async fn terminated(&self) -> Result<ContainerTermination> {
        let mut rx = self.termination.clone();
        let termination = rx.wait_for(Option::is_some).await.map_err(|_| {
            AgentError::ContainerizerError("Container supervisor went away".to_string())
        })?;
        Ok(termination.clone().unwrap_or_default())
    }
}

/// Runs nested containers as local child processes.
pub struct LocalContainerizer {
    work_dir: PathBuf,
    max_record_size: usize,
    table: Arc<ContainerTable>,
}

impl LocalContainerizer {
    pub fn new(work_dir: impl Into<PathBuf>, max_record_size: usize) -> Self {
        Self::with_retention(work_dir, max_record_size, EXITED_RETENTION)
    }

    fn with_retention(
        work_dir: impl Into<PathBuf>,
        max_record_size: usize,
        retention: usize,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            max_record_size,
            table: Arc::new(ContainerTable::new(retention)),
        }
    }

    fn sandbox_dir(&self, container_id: &ContainerId) -> PathBuf {
        self.work_dir
            .join("containers")
            .join(container_id.to_string())
    }

    fn lookup(&self, container_id: &ContainerId) -> Option<Arc<LocalContainer>> {
        self.table
            .containers
            .get(container_id)
            .map(|entry| entry.value().clone())
    }

    fn require(&self, container_id: &ContainerId) -> Result<Arc<LocalContainer>> {
        self.lookup(container_id).ok_or_else(|| {
            AgentError::ContainerizerError(format!("Container {} not found", container_id))
        })
    }
}

fn build_command(command: &CommandInfo) -> Result<Command> {
    let value = command.value.as_deref().unwrap_or_default();
    if value.is_empty() {
        return Err(AgentError::ContainerizerError(
            "Command value must not be empty".to_string(),
        ));
    }

    let mut cmd = if command.shell.unwrap_or(true) {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(value);
        cmd
    } else {
        // arguments[0] is argv[0] by convention.
        let mut cmd = Command::new(value);
        cmd.args(command.arguments.iter().skip(1));
        cmd
    };

    if let Some(environment) = &command.environment {
        for variable in &environment.variables {
            cmd.env(&variable.name, &variable.value);
        }
    }

    Ok(cmd)
}

#[cfg(unix)]
fn wait_status(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    Some(status.into_raw())
}

#[cfg(not(unix))]
fn wait_status(status: ExitStatus) -> Option<i32> {
    status.code()
}

async fn pump<R: AsyncRead + Unpin>(
    mut source: R,
    stream: process_io::data::Type,
    container: &LocalContainer,
) {
    let mut buf = vec![0u8; OUTPUT_CHUNK_SIZE];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                container
                    .output
                    .publish(ProcessIo::data(stream, buf[..n].to_vec()))
                    .await
            }
            Err(e) => {
                tracing::debug!(stream = %stream, error = %e, "Container output read failed");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    container: Arc<LocalContainer>,
    termination: watch::Sender<Option<ContainerTermination>>,
    container_id: ContainerId,
    table: Arc<ContainerTable>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = container.kill.notified() => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(container_id = %container_id, error = %e, "Failed to kill container");
            }
            child.wait().await
        }
    };

    let result = match status {
        Ok(status) => ContainerTermination {
            status: wait_status(status),
            message: None,
        },
        Err(e) => ContainerTermination {
            status: None,
            message: Some(format!("Failed to reap container: {}", e)),
        },
    };

    tracing::info!(
        container_id = %container_id,
        status = ?result.status,
        "Container terminated"
    );
    let _ = termination.send(Some(result));
    table.retire(&container_id, &container);
}

async fn stream_output(mut records: OutputSubscription, writer: PipeWriter, accept: ContentType) {
    loop {
        tokio::select! {
            record = records.next() => match record {
                Some(record) => {
                    let frame = match recordio::encode_message(accept, &record) {
                        Ok(frame) => frame,
                        Err(e) => {
                            writer.fail(e.to_string()).await;
                            return;
                        }
                    };
                    if writer.write(frame).await.is_err() {
                        return;
                    }
                }
                None => {
                    writer.close();
                    return;
                }
            },
            _ = writer.reader_closed() => return,
        }
    }
}

#[async_trait]
impl Containerizer for LocalContainerizer {
    async fn launch(&self, spec: LaunchSpec) -> Result<bool> {
        if let Some(info) = &spec.container {
            if info.r#type() == container_info::Type::Docker || info.tty_info.is_some() {
                return Ok(false);
            }
        }

        if self.table.containers.contains_key(&spec.container_id) {
            return Err(AgentError::ContainerizerError(format!(
                "Container {} already exists",
                spec.container_id
            )));
        }

        let sandbox = self.sandbox_dir(&spec.container_id);
        tokio::fs::create_dir_all(&sandbox).await.map_err(|e| {
            AgentError::ContainerizerError(format!(
                "Failed to create sandbox {}: {}",
                sandbox.display(),
                e
            ))
        })?;

        let mut cmd = build_command(&spec.command)?;
        cmd.current_dir(&sandbox)
            .env("MESOS_SANDBOX", &sandbox)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AgentError::ContainerizerError(format!(
                "Failed to spawn container {}: {}",
                spec.container_id, e
            ))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (termination_tx, termination_rx) = watch::channel(None);

        let container = Arc::new(LocalContainer {
            pid: child.id(),
            stdin: AsyncMutex::new(stdin),
            output: OutputFanout::default(),
            termination: termination_rx,
            kill: Notify::new(),
        });
        self.table
            .containers
            .insert(spec.container_id.clone(), container.clone());

        let pumped = container.clone();
        tokio::spawn(async move {
            let out = async {
                if let Some(stdout) = stdout {
                    pump(stdout, process_io::data::Type::Stdout, &pumped).await;
                }
            };
            let err = async {
                if let Some(stderr) = stderr {
                    pump(stderr, process_io::data::Type::Stderr, &pumped).await;
                }
            };
            tokio::join!(out, err);
            pumped.output.close();
        });

        tokio::spawn(supervise(
            child,
            container.clone(),
            termination_tx,
            spec.container_id.clone(),
            self.table.clone(),
        ));

        tracing::info!(
            container_id = %spec.container_id,
            pid = ?container.pid,
            class = ?spec.class,
            user = ?spec.user,
            "Container launched"
        );
        Ok(true)
    }

    async fn wait(&self, container_id: &ContainerId) -> Result<Option<ContainerTermination>> {
        let Some(container) = self.lookup(container_id) else {
            return Ok(None);
        };
        container.terminated().await.map(Some)
    }

    async fn destroy(&self, container_id: &ContainerId) -> Result<bool> {
        let Some(container) = self.table.remove(container_id) else {
            return Ok(false);
        };
        container.kill.notify_one();
        container.terminated().await?;
        tracing::debug!(container_id = %container_id, "Container destroyed");
        Ok(true)
    }

    async fn attach(&self, container_id: &ContainerId) -> Result<Box<dyn Connection>> {
        let container = self.require(container_id)?;
        Ok(Box::new(LocalConnection {
            container,
            max_record_size: self.max_record_size,
        }))
    }

    async fn status(&self, container_id: &ContainerId) -> Result<ContainerStatus> {
        let container = self.require(container_id)?;
        Ok(ContainerStatus {
            container_id: Some(container_id.clone()),
            executor_pid: container.pid,
        })
    }

    async fn usage(&self, container_id: &ContainerId) -> Result<ResourceStatistics> {
        let container = self.require(container_id)?;
        let now = chrono::Utc::now();
        Ok(ResourceStatistics {
            timestamp: now.timestamp_millis() as f64 / 1000.0,
            processes: Some(if container.is_terminated() { 0 } else { 1 }),
            ..Default::default()
        })
    }
}

struct LocalConnection {
    container: Arc<LocalContainer>,
    max_record_size: usize,
}

impl LocalConnection {
    fn attach_output(
        &self,
        content_type: ContentType,
        accept: ContentType,
        body: &[u8],
    ) -> IoResponse {
        let received: Call = match content::deserialize(content_type, body) {
            Ok(received) => received,
            Err(e) => return IoResponse::error(StatusCode::BAD_REQUEST, e.to_string()),
        };
        if received.r#type() != call::Type::AttachContainerOutput {
            return IoResponse::error(
                StatusCode::BAD_REQUEST,
                format!(
                    "Expecting ATTACH_CONTAINER_OUTPUT call, received {}",
                    received.r#type()
                ),
            );
        }

        let (reader, writer) = pipe();
        tokio::spawn(stream_output(self.container.output.subscribe(), writer, accept));
        IoResponse::ok(accept.streaming_type(), IoBody::Pipe(reader))
    }

    async fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut stdin = self.container.stdin.lock().await;
        if data.is_empty() {
            // Empty data closes the container's stdin.
            stdin.take();
            return Ok(());
        }
        let Some(writer) = stdin.as_mut() else {
            return Err(AgentError::ContainerizerError(
                "Container stdin is closed".to_string(),
            ));
        };
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn attach_input(&self, mut records: RecordReader<Call>) -> IoResponse {
        loop {
            let record = match records.read().await {
                Ok(Some(record)) => record,
                Ok(None) => return IoResponse::empty(StatusCode::OK),
                Err(e) => return IoResponse::error(StatusCode::BAD_REQUEST, e.to_string()),
            };

            let Some(input) = record.attach_container_input else {
                return IoResponse::error(
                    StatusCode::BAD_REQUEST,
                    "Expecting 'attach_container_input' to be present",
                );
            };

            let Some(process_io) = input.process_io else {
                // The opening CONTAINER_ID record carries no I/O.
                continue;
            };

            match (process_io.r#type(), process_io.data) {
                (process_io::Type::Data, Some(data))
                    if data.r#type() == process_io::data::Type::Stdin =>
                {
                    if let Err(e) = self.write_stdin(&data.data).await {
                        return IoResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
                    }
                }
                (process_io::Type::Control, _) => {}
                _ => {
                    return IoResponse::error(
                        StatusCode::BAD_REQUEST,
                        "Only STDIN data and CONTROL records are accepted as input",
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn send(self: Box<Self>, request: IoRequest) -> Result<IoResponse> {
        match request.body {
            IoBody::Full(body) => {
                Ok(self.attach_output(request.content_type, request.accept, &body))
            }
            IoBody::Pipe(reader) => {
                let records = RecordReader::new(
                    reader.map_err(AgentError::from),
                    request.content_type,
                    self.max_record_size,
                );
                Ok(self.attach_input(records).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_agent_core::recordio::DEFAULT_MAX_RECORD_SIZE;
    use a3s_agent_core::wire::agent::call::attach_container_input;
    use a3s_agent_core::wire::mesos::{AgentId, ContainerInfo, TtyInfo};

    use crate::containerizer::ContainerClass;

    fn spec(id: &ContainerId, shell: &str) -> LaunchSpec {
        LaunchSpec {
            container_id: id.clone(),
            command: CommandInfo::shell_command(shell),
            container: None,
            user: None,
            agent_id: AgentId::from("agent"),
            class: ContainerClass::Debug,
        }
    }

    fn nested(child: &str) -> ContainerId {
        ContainerId::nested(ContainerId::new("executor"), child)
    }

    fn output_call(id: &ContainerId) -> bytes::Bytes {
        let mut call = Call::of(call::Type::AttachContainerOutput);
        call.attach_container_output = Some(call::AttachContainerOutput {
            container_id: Some(id.clone()),
        });
        content::serialize(ContentType::Json, &call).unwrap()
    }

    async fn collect_stdout(response: IoResponse) -> Vec<u8> {
        let IoBody::Pipe(reader) = response.body else {
            panic!("expected a streaming body");
        };
        let mut records: RecordReader<ProcessIo> = RecordReader::new(
            reader.map_err(AgentError::from),
            ContentType::StreamingJson,
            DEFAULT_MAX_RECORD_SIZE,
        );
        let mut stdout = Vec::new();
        while let Some(record) = records.read().await.unwrap() {
            let data = record.data.unwrap();
            if data.r#type() == process_io::data::Type::Stdout {
                stdout.extend_from_slice(&data.data);
            }
        }
        stdout
    }

    #[tokio::test]
    async fn test_unsupported_container_info() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        let id = nested("tty");
        let mut launch = spec(&id, "true");
        launch.container = Some(ContainerInfo {
            r#type: container_info::Type::Mesos as i32,
            hostname: None,
            tty_info: Some(TtyInfo::default()),
        });
        assert!(!runtime.launch(launch).await.unwrap());
        assert!(runtime.wait(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_launch_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        let id = nested("exit");
        assert!(runtime.launch(spec(&id, "exit 3")).await.unwrap());

        let termination = runtime.wait(&id).await.unwrap().unwrap();
        assert_eq!(termination.status, Some(3 << 8));
        assert!(dir.path().join("containers").join("executor.exit").is_dir());
    }

    #[tokio::test]
    async fn test_duplicate_launch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        let id = nested("dup");
        assert!(runtime.launch(spec(&id, "sleep 5")).await.unwrap());
        assert!(runtime.launch(spec(&id, "sleep 5")).await.is_err());
        assert!(runtime.destroy(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        let id = nested("sleeper");
        assert!(runtime.launch(spec(&id, "sleep 30")).await.unwrap());
        assert_eq!(runtime.status(&id).await.unwrap().container_id, Some(id.clone()));

        assert!(runtime.destroy(&id).await.unwrap());
        assert!(!runtime.destroy(&id).await.unwrap());
        assert!(runtime.wait(&id).await.unwrap().is_none());
        assert!(runtime.status(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_attach_output_replays_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        let id = nested("echo");
        assert!(runtime.launch(spec(&id, "echo hello")).await.unwrap());
        runtime.wait(&id).await.unwrap();

        let connection = runtime.attach(&id).await.unwrap();
        let response = connection
            .send(IoRequest {
                content_type: ContentType::Json,
                accept: ContentType::Json,
                body: IoBody::Full(output_call(&id)),
            })
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type, Some(ContentType::StreamingJson));
        assert_eq!(collect_stdout(response).await, b"hello\n");
    }

    #[tokio::test]
    async fn test_attach_input_reaches_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        let id = nested("cat");
        assert!(runtime.launch(spec(&id, "cat")).await.unwrap());

        let output = runtime
            .attach(&id)
            .await
            .unwrap()
            .send(IoRequest {
                content_type: ContentType::Json,
                accept: ContentType::Json,
                body: IoBody::Full(output_call(&id)),
            })
            .await
            .unwrap();

        let (reader, writer) = pipe();
        let input = runtime.attach(&id).await.unwrap();
        let send = tokio::spawn(input.send(IoRequest {
            content_type: ContentType::StreamingJson,
            accept: ContentType::Json,
            body: IoBody::Pipe(reader),
        }));

        let mut first = Call::of(call::Type::AttachContainerInput);
        first.attach_container_input = Some(call::AttachContainerInput {
            r#type: attach_container_input::Type::ContainerId as i32,
            container_id: Some(id.clone()),
            process_io: None,
        });
        let data = |bytes: &[u8]| {
            let mut call = Call::of(call::Type::AttachContainerInput);
            call.attach_container_input = Some(call::AttachContainerInput {
                r#type: attach_container_input::Type::ProcessIo as i32,
                container_id: None,
                process_io: Some(ProcessIo::data(process_io::data::Type::Stdin, bytes.to_vec())),
            });
            call
        };

        for call in [first, data(b"ping\n"), data(b"")] {
            writer
                .write(recordio::encode_message(ContentType::Json, &call).unwrap())
                .await
                .unwrap();
        }
        writer.close();

        let response = send.await.unwrap().unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(collect_stdout(output).await, b"ping\n");
        runtime.wait(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_subscriber_holds_one_record() {
        let fanout = Arc::new(OutputFanout::default());
        let mut subscription = fanout.subscribe();

        let publisher = fanout.clone();
        let publish = tokio::spawn(async move {
            for line in ["a", "b", "c"] {
                publisher
                    .publish(ProcessIo::data(process_io::data::Type::Stdout, line))
                    .await;
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!publish.is_finished());

        let mut seen = Vec::new();
        for _ in 0..3 {
            let record = subscription.next().await.unwrap();
            seen.push(record.data.unwrap().data);
        }
        publish.await.unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_does_not_stall_output() {
        let fanout = OutputFanout::default();
        drop(fanout.subscribe());
        for line in ["a", "b", "c"] {
            fanout
                .publish(ProcessIo::data(process_io::data::Type::Stdout, line))
                .await;
        }
        assert!(fanout.log.lock().subscribers.is_empty());

        fanout.close();
        let mut late = fanout.subscribe();
        for _ in 0..3 {
            assert!(late.next().await.is_some());
        }
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn test_exited_containers_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::with_retention(dir.path(), DEFAULT_MAX_RECORD_SIZE, 1);
        let first = nested("first");
        let second = nested("second");

        assert!(runtime.launch(spec(&first, "true")).await.unwrap());
        runtime.wait(&first).await.unwrap().unwrap();
        assert!(runtime.launch(spec(&second, "true")).await.unwrap());
        runtime.wait(&second).await.unwrap().unwrap();

        let evicted = async {
            while runtime.lookup(&first).is_some() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), evicted)
            .await
            .unwrap();

        assert!(runtime.wait(&first).await.unwrap().is_none());
        assert!(runtime.wait(&second).await.unwrap().is_some());
        assert!(runtime.destroy(&second).await.unwrap());
        assert!(runtime.table.exited.lock().is_empty());
    }

    #[tokio::test]
    async fn test_attach_unknown_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LocalContainerizer::new(dir.path(), DEFAULT_MAX_RECORD_SIZE);
        assert!(runtime.attach(&nested("missing")).await.is_err());
    }
}
