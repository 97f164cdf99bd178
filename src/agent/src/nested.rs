//! Nested container lifecycle: launch, wait, kill, attach, and sessions.
//!
//! A nested container lives under an executor's container. Every operation
//! that names one first resolves the owning executor from a state snapshot,
//! then asks the authorization gate, then calls the runtime. The runtime's
//! own not-found answer covers executors that vanish in between.
//!
//! Sessions bind a container's lifetime to its attached output stream: when
//! the stream ends for any reason the container is destroyed, exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use http::StatusCode;

use a3s_agent_core::call::{AgentResponse, NestedLaunch};
use a3s_agent_core::content::{self, ContentType};
use a3s_agent_core::event::{events, AgentEvent, EventEmitter};
use a3s_agent_core::pipe::{pipe, PipeReader};
use a3s_agent_core::recordio::{self, RecordReader};
use a3s_agent_core::wire::agent::{call, Call, ProcessIo};
use a3s_agent_core::wire::mesos::{AgentId, ContainerId, FrameworkInfo};

use crate::authorization::{authorize, Action, AuthorizationGate, Object};
use crate::containerizer::{
    ContainerClass, Containerizer, IoBody, IoRequest, IoResponse, LaunchSpec,
};
use crate::error::ApiError;
use crate::metrics::{AgentMetrics, DestroyReason};
use crate::relay;
use crate::store::{AgentStore, Executor};

/// Rejects ids nested more than one level below an executor container.
fn check_depth(container_id: &ContainerId, field: &str) -> Result<(), ApiError> {
    let grandparent = container_id
        .parent
        .as_deref()
        .and_then(|parent| parent.parent.as_deref());
    if grandparent.is_some() {
        return Err(ApiError::NotImplemented(format!(
            "Only a single level of container nesting is supported currently, \
             but '{}.container_id.parent.parent' is set",
            field
        )));
    }
    Ok(())
}

fn container_event(key: &str, container_id: &ContainerId) -> AgentEvent {
    AgentEvent::with_map(
        key,
        HashMap::from([(
            "container_id".to_string(),
            serde_json::Value::String(container_id.to_string()),
        )]),
    )
}

#[derive(Clone)]
pub struct NestedContainers {
    store: Arc<AgentStore>,
    gate: AuthorizationGate,
    containerizer: Arc<dyn Containerizer>,
    agent_id: AgentId,
    max_record_size: usize,
    metrics: AgentMetrics,
    events: EventEmitter,
}

impl NestedContainers {
    pub fn new(
        store: Arc<AgentStore>,
        gate: AuthorizationGate,
        containerizer: Arc<dyn Containerizer>,
        agent_id: AgentId,
        max_record_size: usize,
        metrics: AgentMetrics,
        events: EventEmitter,
    ) -> Self {
        Self {
            store,
            gate,
            containerizer,
            agent_id,
            max_record_size,
            metrics,
            events,
        }
    }

    async fn authorize(
        &self,
        principal: Option<&str>,
        action: Action,
        object: Object<'_>,
    ) -> Result<(), ApiError> {
        authorize(&self.gate, principal, action, object).await
    }

    /// Executor owning `container_id` directly or as its parent.
    async fn locate(
        &self,
        container_id: &ContainerId,
    ) -> Result<(FrameworkInfo, Executor), ApiError> {
        self.store
            .executor_for_container(container_id)
            .await
            .ok_or_else(|| {
                ApiError::NotFound(format!("Container {} cannot be found", container_id))
            })
    }

    /// Best-effort destroy issued by the agent itself. Failures are logged.
    async fn destroy(&self, container_id: &ContainerId, reason: DestroyReason) {
        self.metrics.container_destroyed(reason);
        match self.containerizer.destroy(container_id).await {
            Ok(_) => self
                .events
                .emit(container_event(events::CONTAINER_DESTROYED, container_id)),
            Err(e) => tracing::error!(
                container_id = %container_id,
                reason = ?reason,
                error = %e,
                "Failed to destroy nested container"
            ),
        }
    }

    pub async fn launch(
        &self,
        launch: NestedLaunch,
        principal: Option<&str>,
    ) -> Result<(), ApiError> {
        check_depth(&launch.container_id, "launch_nested_container")?;
        self.launch_container(
            launch,
            ContainerClass::Default,
            Action::LaunchNestedContainer,
            principal,
        )
        .await
    }

    async fn launch_container(
        &self,
        launch: NestedLaunch,
        class: ContainerClass,
        action: Action,
        principal: Option<&str>,
    ) -> Result<(), ApiError> {
        let container_id = &launch.container_id;
        let parent = container_id.parent.as_deref().ok_or_else(|| {
            ApiError::BadRequest("Expecting 'container_id.parent' to be present".to_string())
        })?;

        let (framework, executor) = self
            .store
            .executor_for_parent(container_id)
            .await
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Unable to locate executor for parent container {}",
                    parent
                ))
            })?;

        self.authorize(
            principal,
            action,
            Object {
                executor_info: Some(&executor.info),
                framework_info: Some(&framework),
                command_info: Some(&launch.command),
                ..Default::default()
            },
        )
        .await?;

        let user = launch
            .command
            .user
            .clone()
            .unwrap_or_else(|| executor.user.clone());

        let spec = LaunchSpec {
            container_id: container_id.clone(),
            command: launch.command.clone(),
            container: launch.container.clone(),
            user: Some(user),
            agent_id: self.agent_id.clone(),
            class,
        };

        match self.containerizer.launch(spec).await {
            Ok(true) => {
                tracing::info!(
                    container_id = %container_id,
                    framework_id = %executor.framework_id,
                    executor_id = %executor.id,
                    class = ?class,
                    "Launched nested container"
                );
                self.events
                    .emit(container_event(events::CONTAINER_LAUNCHED, container_id));
                Ok(())
            }
            Ok(false) => Err(ApiError::BadRequest(
                "The provided ContainerInfo is not supported".to_string(),
            )),
            Err(e) => {
                tracing::error!(
                    container_id = %container_id,
                    framework_id = %executor.framework_id,
                    error = %e,
                    "Failed to launch nested container"
                );
                self.destroy(container_id, DestroyReason::LaunchFailed).await;
                self.events
                    .emit(container_event(events::CONTAINER_LAUNCH_FAILED, container_id));
                Err(ApiError::internal(e))
            }
        }
    }

    pub async fn wait(
        &self,
        container_id: &ContainerId,
        principal: Option<&str>,
    ) -> Result<AgentResponse, ApiError> {
        check_depth(container_id, "wait_nested_container")?;
        let (framework, executor) = self.locate(container_id).await?;
        self.authorize(
            principal,
            Action::WaitNestedContainer,
            Object {
                executor_info: Some(&executor.info),
                framework_info: Some(&framework),
                ..Default::default()
            },
        )
        .await?;

        match self.containerizer.wait(container_id).await {
            Ok(Some(termination)) => Ok(AgentResponse::WaitNestedContainer {
                exit_status: termination.status,
            }),
            Ok(None) => Err(ApiError::NotFound(format!(
                "Container {} cannot be found",
                container_id
            ))),
            Err(e) => {
                tracing::error!(
                    container_id = %container_id,
                    error = %e,
                    "Failed to wait for nested container"
                );
                Err(ApiError::internal(e))
            }
        }
    }

    pub async fn kill(
        &self,
        container_id: &ContainerId,
        principal: Option<&str>,
    ) -> Result<(), ApiError> {
        check_depth(container_id, "kill_nested_container")?;
        let (framework, executor) = self.locate(container_id).await?;
        self.authorize(
            principal,
            Action::KillNestedContainer,
            Object {
                executor_info: Some(&executor.info),
                framework_info: Some(&framework),
                ..Default::default()
            },
        )
        .await?;

        match self.containerizer.destroy(container_id).await {
            Ok(true) => {
                self.metrics.container_destroyed(DestroyReason::Killed);
                self.events
                    .emit(container_event(events::CONTAINER_DESTROYED, container_id));
                Ok(())
            }
            Ok(false) => Err(ApiError::NotFound(format!(
                "Container '{}' cannot be found (or is already killed)",
                container_id
            ))),
            Err(e) => {
                tracing::error!(
                    container_id = %container_id,
                    error = %e,
                    "Failed to kill nested container"
                );
                Err(ApiError::internal(e))
            }
        }
    }

    /// Relays an input record stream into the container.
    ///
    /// `first` is the opening CONTAINER_ID record already read from the
    /// request; `records` yields the rest. The container's answer is
    /// returned as-is.
    pub async fn attach_input(
        &self,
        container_id: &ContainerId,
        first: Call,
        records: RecordReader<Call>,
        content_type: ContentType,
        accept: ContentType,
    ) -> Result<IoResponse, ApiError> {
        let connection = self
            .containerizer
            .attach(container_id)
            .await
            .map_err(ApiError::internal)?;

        let first_frame = recordio::encode_message(content_type, &first)?;
        let (reader, writer) = pipe();
        let relayed = container_id.clone();
        tokio::spawn(async move {
            let mut records = records;
            if writer.write(first_frame).await.is_err() {
                records.close();
                return;
            }
            let encode = move |call: Call| recordio::encode_message(content_type, &call);
            if let Err(e) = relay::transform(records, writer, encode).await {
                tracing::warn!(
                    container_id = %relayed,
                    error = %e,
                    "Attach input relay stopped"
                );
            }
        });

        let response = connection
            .send(IoRequest {
                content_type,
                accept,
                body: IoBody::Pipe(reader),
            })
            .await
            .map_err(ApiError::internal)?;
        Ok(response)
    }

    /// Opens the container's output, re-encoded in `accept`'s streaming
    /// form. A non-200 answer from the container comes back as `Err`.
    async fn open_output(
        &self,
        container_id: &ContainerId,
        call: &Call,
        content_type: ContentType,
        accept: ContentType,
    ) -> Result<Result<PipeReader, IoResponse>, ApiError> {
        let stream_type = accept.streaming_type();
        let connection = self
            .containerizer
            .attach(container_id)
            .await
            .map_err(ApiError::internal)?;

        let body = content::serialize(content_type.message_type(), call)?;
        let response = connection
            .send(IoRequest {
                content_type: content_type.message_type(),
                accept: stream_type,
                body: IoBody::Full(body),
            })
            .await
            .map_err(ApiError::internal)?;

        if response.status != StatusCode::OK {
            return Ok(Err(response));
        }

        let records: RecordReader<ProcessIo> = RecordReader::new(
            response.body.into_stream(),
            stream_type,
            self.max_record_size,
        );
        let (reader, writer) = pipe();
        let relayed = container_id.clone();
        tokio::spawn(async move {
            let encode = move |record: ProcessIo| recordio::encode_message(stream_type, &record);
            if let Err(e) = relay::transform(records, writer, encode).await {
                tracing::debug!(
                    container_id = %relayed,
                    error = %e,
                    "Attach output relay stopped"
                );
            }
        });
        Ok(Ok(reader))
    }

    pub async fn attach_output(
        &self,
        container_id: &ContainerId,
        call: &Call,
        content_type: ContentType,
        accept: ContentType,
    ) -> Result<IoResponse, ApiError> {
        match self
            .open_output(container_id, call, content_type, accept)
            .await?
        {
            Ok(reader) => Ok(IoResponse::ok(accept.streaming_type(), IoBody::Pipe(reader))),
            Err(passthrough) => Ok(passthrough),
        }
    }

    /// Launches a DEBUG container and streams its output to the caller.
    pub async fn session(
        &self,
        launch: NestedLaunch,
        content_type: ContentType,
        accept: ContentType,
        principal: Option<&str>,
    ) -> Result<IoResponse, ApiError> {
        check_depth(&launch.container_id, "launch_nested_container_session")?;
        if !accept.is_streaming() {
            return Err(ApiError::NotAcceptable(format!(
                "Response type {} is not supported for LAUNCH_NESTED_CONTAINER_SESSION call",
                accept
            )));
        }

        let container_id = launch.container_id.clone();
        self.launch_container(
            launch,
            ContainerClass::Debug,
            Action::LaunchNestedContainerSession,
            principal,
        )
        .await?;

        let mut attach = Call::of(call::Type::AttachContainerOutput);
        attach.attach_container_output = Some(call::AttachContainerOutput {
            container_id: Some(container_id.clone()),
        });

        let output = match self
            .open_output(&container_id, &attach, content_type, accept)
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(passthrough)) => {
                tracing::warn!(
                    container_id = %container_id,
                    status = %passthrough.status,
                    "Attach output for session was refused"
                );
                self.destroy(&container_id, DestroyReason::SessionFailed).await;
                return Ok(passthrough);
            }
            Err(e) => {
                tracing::error!(
                    container_id = %container_id,
                    error = %e,
                    "Failed to attach output for session"
                );
                self.destroy(&container_id, DestroyReason::SessionFailed).await;
                return Err(e);
            }
        };

        let (reader, writer) = pipe();
        self.metrics.session_started();
        self.events
            .emit(container_event(events::SESSION_STARTED, &container_id));

        let this = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = relay::connect(output, &writer) => Some(result),
                _ = writer.reader_closed() => None,
            };

            let (reason, failure) = match outcome {
                Some(Ok(())) => {
                    tracing::warn!(
                        container_id = %container_id,
                        "Received unexpected EOF attach response for container {}",
                        container_id
                    );
                    (DestroyReason::SessionEnded, None)
                }
                Some(Err(e)) => {
                    tracing::error!(
                        container_id = %container_id,
                        error = %e,
                        "Session output relay failed"
                    );
                    (DestroyReason::SessionFailed, Some(e.to_string()))
                }
                None => {
                    tracing::info!(
                        container_id = %container_id,
                        "Session client disconnected"
                    );
                    (DestroyReason::SessionEnded, None)
                }
            };

            this.destroy(&container_id, reason).await;
            match failure {
                Some(reason) => writer.fail(reason).await,
                None => writer.close(),
            }
            this.metrics.session_ended();
            this.events
                .emit(container_event(events::SESSION_ENDED, &container_id));
        });

        Ok(IoResponse::ok(accept, IoBody::Pipe(reader)))
    }
}
