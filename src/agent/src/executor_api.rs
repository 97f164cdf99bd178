//! Executor API: `POST /api/v1/executor`.
//!
//! Executors subscribe to receive their event stream and report task status
//! over separate requests. The subscription stays open until the executor
//! disconnects or a newer subscription replaces it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::mpsc;

use a3s_agent_core::content::{self, Accept, ContentType};
use a3s_agent_core::error::AgentError;
use a3s_agent_core::event::{events, AgentEvent};
use a3s_agent_core::pipe::{pipe, PipeWriter};
use a3s_agent_core::recordio;
use a3s_agent_core::validation::validate_executor_call;
use a3s_agent_core::wire::executor::{call, Call, Event};
use a3s_agent_core::wire::mesos::{ExecutorId, FrameworkId, TaskInfo};

use crate::api::AgentContext;
use crate::error::ApiError;
use crate::store::{ExecutorState, StoreError, Subscription};

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

pub async fn handle(
    State(ctx): State<Arc<AgentContext>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match serve(&ctx, &method, &headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn serve(
    ctx: &AgentContext,
    method: &Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    if method != Method::POST {
        return Err(ApiError::MethodNotAllowed(format!(
            "Expecting 'POST', received '{}'",
            method
        )));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .ok_or_else(|| ApiError::BadRequest("Expecting 'Content-Type' to be present".to_string()))?
        .to_str()
        .ok()
        .and_then(ContentType::parse)
        .filter(|ct| !ct.is_streaming())
        .ok_or_else(|| {
            ApiError::UnsupportedMediaType(
                "Expecting 'Content-Type' of application/json or application/x-protobuf"
                    .to_string(),
            )
        })?;

    let bytes = axum::body::to_bytes(body, ctx.config.max_record_size)
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read request body: {}", e)))?;
    let call: Call = content::deserialize(content_type, &bytes)?;

    validate_executor_call(&call).map_err(|e| match e {
        AgentError::ValidationError(msg) => {
            ApiError::BadRequest(format!("Failed to validate Executor::Call: {}", msg))
        }
        other => ApiError::from(other),
    })?;

    let kind = call::Type::from_number(call.r#type).unwrap_or(call::Type::Unknown);
    ctx.metrics.executor_call(kind.as_str_name());

    let accept = if kind == call::Type::Subscribe {
        let accept = Accept::parse(headers.get(ACCEPT).map(|v| v.to_str().unwrap_or("")))
            .negotiate(&[ContentType::Json, ContentType::Protobuf])
            .ok_or_else(|| {
                ApiError::NotAcceptable(
                    "Expecting 'Accept' to allow application/json or application/x-protobuf"
                        .to_string(),
                )
            })?;
        Some(accept)
    } else {
        if ctx.store.is_recovering() {
            return Err(ApiError::ServiceUnavailable(
                "Agent has not finished recovery".to_string(),
            ));
        }
        None
    };

    // Validation guarantees both ids.
    let framework_id = call.framework_id.clone().unwrap_or_default();
    let executor_id = call.executor_id.clone().unwrap_or_default();

    let state = ctx.store.executor_state(&framework_id, &executor_id).await?;
    if state == ExecutorState::Registering && kind != call::Type::Subscribe {
        return Err(ApiError::Forbidden("Executor is not subscribed".to_string()));
    }

    match (kind, accept) {
        (call::Type::Subscribe, Some(accept)) => {
            let unacknowledged = call
                .subscribe
                .map(|s| s.unacknowledged_tasks)
                .unwrap_or_default();
            subscribe(ctx, framework_id, executor_id, unacknowledged, accept).await
        }

        (call::Type::Update, _) => {
            let status = call.update.and_then(|u| u.status).ok_or_else(|| {
                ApiError::BadRequest("Expecting 'update.status' to be present".to_string())
            })?;
            let task_id = status.task_id.clone();
            let task_state = status.state;
            ctx.store
                .update_status(&framework_id, &executor_id, status)
                .await?;
            ctx.events.emit(AgentEvent::with_map(
                events::EXECUTOR_UPDATE,
                HashMap::from([
                    (
                        "executor_id".to_string(),
                        serde_json::Value::String(executor_id.to_string()),
                    ),
                    (
                        "task_id".to_string(),
                        serde_json::json!(task_id.map(|t| t.value)),
                    ),
                    ("state".to_string(), serde_json::json!(task_state)),
                ]),
            ));
            Ok(StatusCode::ACCEPTED.into_response())
        }

        (call::Type::Message, _) => {
            let size = call.message.map(|m| m.data.len()).unwrap_or(0);
            tracing::info!(
                framework_id = %framework_id,
                executor_id = %executor_id,
                bytes = size,
                "Received message from executor"
            );
            Ok(StatusCode::ACCEPTED.into_response())
        }

        _ => Err(ApiError::NotImplemented(
            "Unsupported executor call type".to_string(),
        )),
    }
}

/// Opens the executor's event stream as a RecordIO response body.
async fn subscribe(
    ctx: &AgentContext,
    framework_id: FrameworkId,
    executor_id: ExecutorId,
    unacknowledged: Vec<TaskInfo>,
    accept: ContentType,
) -> Result<Response, ApiError> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let subscribed = ctx
        .store
        .subscribe(
            &framework_id,
            &executor_id,
            &ctx.agent_id,
            unacknowledged,
            Subscription::new(events_tx),
        )
        .await?;

    tracing::info!(
        framework_id = %framework_id,
        executor_id = %executor_id,
        launched = subscribed.launched,
        "Executor subscribed"
    );
    ctx.events.emit(AgentEvent::with_map(
        events::EXECUTOR_SUBSCRIBED,
        HashMap::from([
            (
                "framework_id".to_string(),
                serde_json::Value::String(framework_id.to_string()),
            ),
            (
                "executor_id".to_string(),
                serde_json::Value::String(executor_id.to_string()),
            ),
        ]),
    ));

    let (reader, writer) = pipe();
    let store = ctx.store.clone();
    tokio::spawn(async move {
        forward_events(events_rx, writer, &executor_id, |event| {
            recordio::encode_message(accept, event)
        })
        .await;

        tracing::info!(
            framework_id = %framework_id,
            executor_id = %executor_id,
            "Executor event stream closed"
        );
        store
            .unsubscribe(&framework_id, &executor_id, subscribed.subscription_id)
            .await;
    });

    let mut response = Response::new(Body::from_stream(reader));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(accept.as_str()));
    Ok(response)
}

/// Copies events into the subscription body until the executor goes away or
/// the subscription is replaced. An event that fails to encode fails the
/// whole stream.
async fn forward_events<F>(
    mut events: mpsc::UnboundedReceiver<Event>,
    writer: PipeWriter,
    executor_id: &ExecutorId,
    encode: F,
) where
    F: Fn(&Event) -> a3s_agent_core::Result<Bytes>,
{
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    writer.close();
                    return;
                };
                let frame = match encode(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(
                            executor_id = %executor_id,
                            error = %e,
                            "Failed to encode executor event"
                        );
                        writer.fail(e.to_string()).await;
                        return;
                    }
                };
                if writer.write(frame).await.is_err() {
                    return;
                }
            }
            _ = writer.reader_closed() => return,
        }
    }
}
