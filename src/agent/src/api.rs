//! Agent operator API: `POST /api/v1`.
//!
//! A request goes through a fixed sequence of checks before any handler
//! runs: recovery, method, authentication, `Content-Type`, `Accept`, body
//! decoding, validation, and the streaming rules. Only then is the call
//! dispatched by kind. Every decoded call is counted in the metrics with
//! the status it was answered with.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;

use a3s_agent_core::call::{AgentCall, AgentResponse};
use a3s_agent_core::config::AgentConfig;
use a3s_agent_core::content::{self, Accept, ContentType};
use a3s_agent_core::error::{AgentError, Result};
use a3s_agent_core::event::{events, AgentEvent, EventEmitter};
use a3s_agent_core::recordio::RecordReader;
use a3s_agent_core::wire::agent::{call, response, Call};
use a3s_agent_core::wire::mesos::{AgentId, VersionInfo};
use a3s_agent_core::VERSION;

use crate::authentication::BasicAuthenticator;
use crate::authorization::{authorize, Action, AuthorizationGate, Authorizer, Object};
use crate::containerizer::{Containerizer, IoBody, IoResponse};
use crate::error::ApiError;
use crate::files::{FileService, SandboxFiles};
use crate::logging::LoggingControl;
use crate::metrics::AgentMetrics;
use crate::nested::NestedContainers;
use crate::store::{AgentStore, ExecutorState, RetentionLimits};
use crate::views;

const MEDIA_TYPES: &str = "application/json or application/x-protobuf or \
                           application/json+recordio or application/x-protobuf+recordio";

/// Everything the agent endpoints share.
pub struct AgentContext {
    pub config: AgentConfig,
    pub agent_id: AgentId,
    pub store: Arc<AgentStore>,
    pub gate: AuthorizationGate,
    pub containerizer: Arc<dyn Containerizer>,
    pub nested: NestedContainers,
    pub files: Arc<dyn FileService>,
    pub logging: LoggingControl,
    pub metrics: AgentMetrics,
    pub events: EventEmitter,
    pub authenticator: BasicAuthenticator,
}

impl AgentContext {
    pub fn new(
        config: AgentConfig,
        containerizer: Arc<dyn Containerizer>,
        authorizer: Option<Arc<dyn Authorizer>>,
        logging: LoggingControl,
    ) -> Result<Self> {
        let agent_id = AgentId::from(config.agent_id.as_str());
        let store = Arc::new(AgentStore::new(RetentionLimits::from(&config)));
        let gate = AuthorizationGate::new(authorizer);
        let metrics = AgentMetrics::new().map_err(|e| AgentError::Other(e.to_string()))?;
        let events = EventEmitter::default();
        let nested = NestedContainers::new(
            store.clone(),
            gate.clone(),
            containerizer.clone(),
            agent_id.clone(),
            config.max_record_size,
            metrics.clone(),
            events.clone(),
        );
        let files: Arc<dyn FileService> =
            Arc::new(SandboxFiles::new(config.work_dir.clone(), gate.clone()));
        let authenticator = if config.authenticate_http {
            BasicAuthenticator::new(&config.credentials)
        } else {
            BasicAuthenticator::disabled()
        };

        Ok(Self {
            config,
            agent_id,
            store,
            gate,
            containerizer,
            nested,
            files,
            logging,
            metrics,
            events,
            authenticator,
        })
    }

    /// Replaces the sandbox file service.
    pub fn with_files(mut self, files: Arc<dyn FileService>) -> Self {
        self.files = files;
        self
    }
}

/// A call that passed every pre-dispatch check.
struct ApiRequest {
    call: AgentCall,
    wire: Call,
    content_type: ContentType,
    accept: ContentType,
    principal: Option<String>,
    /// The rest of a streaming request body.
    records: Option<RecordReader<Call>>,
}

pub async fn handle(
    State(ctx): State<Arc<AgentContext>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request = match decode(&ctx, &method, &headers, body).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let kind = request.call.kind();
    tracing::info!(
        call = %kind,
        principal = request.principal.as_deref().unwrap_or("<anonymous>"),
        "Processing call"
    );

    let response = dispatch(&ctx, request)
        .await
        .unwrap_or_else(IntoResponse::into_response);
    ctx.metrics
        .api_call(kind.as_str_name(), response.status().as_u16());
    response
}

async fn decode(
    ctx: &AgentContext,
    method: &Method,
    headers: &HeaderMap,
    body: Body,
) -> std::result::Result<ApiRequest, ApiError> {
    if ctx.store.is_recovering() {
        return Err(ApiError::ServiceUnavailable(
            "Agent has not finished recovery".to_string(),
        ));
    }

    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed(format!(
            "Expecting 'POST', received '{}'",
            method
        )));
    }

    let principal = ctx.authenticator.authenticate(headers)?;

    let content_type = headers
        .get(CONTENT_TYPE)
        .ok_or_else(|| ApiError::BadRequest("Expecting 'Content-Type' to be present".to_string()))?
        .to_str()
        .ok()
        .and_then(ContentType::parse)
        .ok_or_else(|| {
            ApiError::UnsupportedMediaType(format!("Expecting 'Content-Type' of {}", MEDIA_TYPES))
        })?;

    let accept = Accept::parse(headers.get(ACCEPT).map(|v| v.to_str().unwrap_or("")))
        .negotiate(&ContentType::RESPONSE_PREFERENCE)
        .ok_or_else(|| {
            ApiError::NotAcceptable(format!("Expecting 'Accept' to allow {}", MEDIA_TYPES))
        })?;

    let (wire, records) = if content_type.is_streaming() {
        let stream = body
            .into_data_stream()
            .map_err(|e| AgentError::Other(format!("Failed to read request body: {}", e)));
        let mut records = RecordReader::new(stream, content_type, ctx.config.max_record_size);
        let first = records.read().await?.ok_or_else(|| {
            ApiError::BadRequest("Received EOF while reading request body".to_string())
        })?;
        (first, Some(records))
    } else {
        let bytes = axum::body::to_bytes(body, ctx.config.max_record_size)
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?;
        (content::deserialize::<Call>(content_type, &bytes)?, None)
    };

    let call = AgentCall::try_from(&wire).map_err(|e| match e {
        AgentError::ValidationError(msg) => {
            ApiError::BadRequest(format!("Failed to validate agent::Call: {}", msg))
        }
        other => ApiError::from(other),
    })?;

    let kind = call.kind();
    if kind == call::Type::AttachContainerInput {
        if !content_type.is_streaming() {
            return Err(ApiError::UnsupportedMediaType(
                "Expecting 'Content-Type' of application/json+recordio or \
                 application/x-protobuf+recordio for ATTACH_CONTAINER_INPUT call"
                    .to_string(),
            ));
        }
    } else if content_type.is_streaming() {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Streaming 'Content-Type' {} is not supported for {} call",
            content_type, kind
        )));
    }

    Ok(ApiRequest {
        call,
        wire,
        content_type,
        accept,
        principal,
        records,
    })
}

async fn dispatch(
    ctx: &AgentContext,
    request: ApiRequest,
) -> std::result::Result<Response, ApiError> {
    let ApiRequest {
        call,
        wire,
        content_type,
        accept,
        principal,
        records,
    } = request;
    let principal = principal.as_deref();

    match call {
        AgentCall::Unknown => Err(ApiError::NotImplemented(
            "Unsupported call type".to_string(),
        )),

        AgentCall::GetHealth => reply(accept, AgentResponse::GetHealth { healthy: true }),

        AgentCall::GetFlags => {
            authorize(&ctx.gate, principal, Action::ViewFlags, Object::default()).await?;
            reply(accept, AgentResponse::GetFlags(ctx.config.flags()))
        }

        AgentCall::GetVersion => reply(
            accept,
            AgentResponse::GetVersion(VersionInfo {
                version: VERSION.to_string(),
                ..Default::default()
            }),
        ),

        AgentCall::GetMetrics { timeout } => {
            let metrics = ctx
                .metrics
                .snapshot(timeout)
                .await
                .map_err(ApiError::internal)?;
            reply(accept, AgentResponse::GetMetrics(metrics))
        }

        AgentCall::GetLoggingLevel => reply(
            accept,
            AgentResponse::GetLoggingLevel {
                level: ctx.logging.level(),
            },
        ),

        AgentCall::SetLoggingLevel { level, duration } => {
            authorize(&ctx.gate, principal, Action::SetLogLevel, Object::default()).await?;
            ctx.logging
                .set_level(level, duration)
                .map_err(ApiError::internal)?;
            ctx.events.emit(AgentEvent::with_map(
                events::LOGGING_LEVEL_CHANGED,
                HashMap::from([
                    ("level".to_string(), serde_json::json!(level)),
                    (
                        "duration_secs".to_string(),
                        serde_json::json!(duration.as_secs_f64()),
                    ),
                ]),
            ));
            Ok(StatusCode::OK.into_response())
        }

        AgentCall::ListFiles { path } => {
            let infos = ctx.files.browse(&path, principal).await?;
            reply(accept, AgentResponse::ListFiles(infos))
        }

        AgentCall::ReadFile {
            path,
            offset,
            length,
        } => {
            let chunk = ctx.files.read(offset, length, &path, principal).await?;
            reply(
                accept,
                AgentResponse::ReadFile {
                    size: chunk.size,
                    data: chunk.data,
                },
            )
        }

        AgentCall::GetState => {
            let approvers = ctx
                .gate
                .view_approvers(principal)
                .await
                .map_err(ApiError::internal)?;
            let state = ctx.store.snapshot().await;
            reply(
                accept,
                AgentResponse::GetState(views::get_state(&state, &approvers)),
            )
        }

        AgentCall::GetFrameworks => {
            let frameworks = ctx
                .gate
                .approver(principal, Action::ViewFramework)
                .await
                .map_err(ApiError::internal)?;
            let state = ctx.store.snapshot().await;
            reply(
                accept,
                AgentResponse::GetFrameworks(views::get_frameworks(&state, frameworks.as_ref())),
            )
        }

        AgentCall::GetExecutors => {
            let (frameworks, executors) = tokio::try_join!(
                ctx.gate.approver(principal, Action::ViewFramework),
                ctx.gate.approver(principal, Action::ViewExecutor),
            )
            .map_err(ApiError::internal)?;
            let state = ctx.store.snapshot().await;
            reply(
                accept,
                AgentResponse::GetExecutors(views::get_executors(
                    &state,
                    frameworks.as_ref(),
                    executors.as_ref(),
                )),
            )
        }

        AgentCall::GetTasks => {
            let (frameworks, tasks) = tokio::try_join!(
                ctx.gate.approver(principal, Action::ViewFramework),
                ctx.gate.approver(principal, Action::ViewTask),
            )
            .map_err(ApiError::internal)?;
            let state = ctx.store.snapshot().await;
            reply(
                accept,
                AgentResponse::GetTasks(views::get_tasks(
                    &state,
                    frameworks.as_ref(),
                    tasks.as_ref(),
                )),
            )
        }

        AgentCall::GetContainers => {
            let containers = containers(ctx, principal).await?;
            reply(accept, AgentResponse::GetContainers(containers))
        }

        AgentCall::LaunchNestedContainer(launch) => {
            ctx.nested.launch(launch, principal).await?;
            Ok(StatusCode::OK.into_response())
        }

        AgentCall::WaitNestedContainer { container_id } => {
            let waited = ctx.nested.wait(&container_id, principal).await?;
            reply(accept, waited)
        }

        AgentCall::KillNestedContainer { container_id } => {
            ctx.nested.kill(&container_id, principal).await?;
            Ok(StatusCode::OK.into_response())
        }

        AgentCall::LaunchNestedContainerSession(launch) => {
            let session = ctx
                .nested
                .session(launch, content_type, accept, principal)
                .await?;
            Ok(io_response(session))
        }

        AgentCall::AttachContainerInput { container_id } => {
            let records = records.ok_or_else(|| {
                ApiError::internal("Streaming request body is no longer available")
            })?;
            let answer = ctx
                .nested
                .attach_input(&container_id, wire, records, content_type, accept)
                .await?;
            Ok(io_response(answer))
        }

        AgentCall::AttachContainerOutput { container_id } => {
            let answer = ctx
                .nested
                .attach_output(&container_id, &wire, content_type, accept)
                .await?;
            Ok(io_response(answer))
        }
    }
}

/// Encodes a reply in the non-streaming form of the negotiated type.
fn reply(accept: ContentType, response: AgentResponse) -> std::result::Result<Response, ApiError> {
    let content_type = accept.message_type();
    let wire: a3s_agent_core::wire::agent::Response = response.into();
    let body = content::serialize(content_type, &wire).map_err(ApiError::internal)?;
    Ok(([(CONTENT_TYPE, content_type.as_str())], body).into_response())
}

fn io_response(io: IoResponse) -> Response {
    let body = match io.body {
        IoBody::Full(bytes) => Body::from(bytes),
        IoBody::Pipe(reader) => Body::from_stream(reader),
    };
    let mut response = Response::new(body);
    *response.status_mut() = io.status;
    if let Some(content_type) = io.content_type {
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static(content_type.as_str()),
        );
    }
    response
}

/// Running executor containers the principal may see, with status and
/// usage where the runtime could provide them.
async fn containers(
    ctx: &AgentContext,
    principal: Option<&str>,
) -> std::result::Result<Vec<response::get_containers::Container>, ApiError> {
    let approver = ctx
        .gate
        .approver(principal, Action::ViewContainer)
        .await
        .map_err(ApiError::internal)?;
    let state = ctx.store.snapshot().await;

    let mut entries = Vec::new();
    for framework in &state.frameworks {
        for executor in &framework.executors {
            if executor.state == ExecutorState::Terminated {
                continue;
            }
            let object = Object {
                executor_info: Some(&executor.info),
                framework_info: Some(&framework.info),
                ..Default::default()
            };
            match approver.approved(&object) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(
                        executor_id = %executor.id,
                        error = %e,
                        "Failed to authorize container view; treating as denied"
                    );
                    continue;
                }
            }
            entries.push(response::get_containers::Container {
                framework_id: Some(framework.id.clone()),
                executor_id: Some(executor.id.clone()),
                executor_name: executor.info.name.clone().unwrap_or_default(),
                container_id: Some(executor.container_id.clone()),
                container_status: None,
                resource_statistics: None,
            });
        }
    }

    let containerizer = &ctx.containerizer;
    let filled = futures::future::join_all(entries.into_iter().map(|mut entry| async move {
        let Some(container_id) = entry.container_id.clone() else {
            return entry;
        };
        let (status, usage) = tokio::join!(
            containerizer.status(&container_id),
            containerizer.usage(&container_id)
        );
        match status {
            Ok(status) => entry.container_status = Some(status),
            Err(e) => tracing::warn!(
                container_id = %container_id,
                executor_id = ?entry.executor_id,
                error = %e,
                "Failed to get container status"
            ),
        }
        match usage {
            Ok(usage) => entry.resource_statistics = Some(usage),
            Err(e) => tracing::warn!(
                container_id = %container_id,
                executor_id = ?entry.executor_id,
                error = %e,
                "Failed to get resource statistics"
            ),
        }
        entry
    }))
    .await;

    Ok(filled)
}
