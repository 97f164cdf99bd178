//! End-to-end tests of the agent call API through the HTTP router.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use serde_json::json;

use a3s_agent::authorization::Action;
use a3s_agent_core::config::{AgentConfig, Credential};
use a3s_agent_core::event::events;
use a3s_agent_core::recordio;
use a3s_agent_core::wire::mesos::{ContainerId, ExecutorId, FrameworkId};

use common::*;

#[tokio::test]
async fn test_get_health_json() {
    let h = harness(MockContainerizer::default(), None).await;

    let response = send(&h.router, json_call(json!({ "type": "GET_HEALTH" }))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );
    let body = body_json(response).await;
    assert_eq!(body["type"], "GET_HEALTH");
    assert_eq!(body["get_health"]["healthy"], true);
}

#[tokio::test]
async fn test_default_accept_prefers_protobuf() {
    let h = harness(MockContainerizer::default(), None).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "type": "GET_VERSION" }).to_string()))
        .unwrap();

    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/x-protobuf"
    );
}

#[tokio::test]
async fn test_unknown_call_not_implemented() {
    let h = harness(MockContainerizer::default(), None).await;
    let text = expect_status(
        &h.router,
        json_call(json!({ "type": "UNKNOWN" })),
        StatusCode::NOT_IMPLEMENTED,
    )
    .await;
    assert_eq!(text, "Unsupported call type");
}

#[tokio::test]
async fn test_request_header_checks() {
    let h = harness(MockContainerizer::default(), None).await;
    let health = json!({ "type": "GET_HEALTH" }).to_string();

    let get = Request::builder()
        .method("GET")
        .uri("/api/v1")
        .body(Body::empty())
        .unwrap();
    let text = expect_status(&h.router, get, StatusCode::METHOD_NOT_ALLOWED).await;
    assert_eq!(text, "Expecting 'POST', received 'GET'");

    let missing = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .body(Body::from(health.clone()))
        .unwrap();
    let text = expect_status(&h.router, missing, StatusCode::BAD_REQUEST).await;
    assert_eq!(text, "Expecting 'Content-Type' to be present");

    let plain = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "text/plain")
        .body(Body::from(health.clone()))
        .unwrap();
    expect_status(&h.router, plain, StatusCode::UNSUPPORTED_MEDIA_TYPE).await;

    let html = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .header("accept", "text/html")
        .body(Body::from(health.clone()))
        .unwrap();
    let text = expect_status(&h.router, html, StatusCode::NOT_ACCEPTABLE).await;
    assert!(text.starts_with("Expecting 'Accept' to allow"));

    let streamed = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json+recordio")
        .header("accept", "application/json")
        .body(Body::from(recordio::encode(health.as_bytes())))
        .unwrap();
    let text = expect_status(&h.router, streamed, StatusCode::UNSUPPORTED_MEDIA_TYPE).await;
    assert_eq!(
        text,
        "Streaming 'Content-Type' application/json+recordio is not supported for GET_HEALTH call"
    );

    let garbage = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    expect_status(&h.router, garbage, StatusCode::BAD_REQUEST).await;
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let config = AgentConfig {
        max_record_size: 64,
        ..Default::default()
    };
    let h = harness_with(config, MockContainerizer::default(), None).await;

    let text = expect_status(
        &h.router,
        json_call(json!({ "type": "GET_HEALTH", "padding": "x".repeat(128) })),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert!(text.starts_with("Failed to read request body"));

    expect_status(
        &h.router,
        json_call(json!({ "type": "GET_HEALTH" })),
        StatusCode::OK,
    )
    .await;
}

#[tokio::test]
async fn test_recovering_agent_rejects_calls_first() {
    let h = harness(MockContainerizer::default(), None).await;
    h.context.store.set_recovering(true);

    // Recovery is checked before the method.
    let get = Request::builder()
        .method("GET")
        .uri("/api/v1")
        .body(Body::empty())
        .unwrap();
    let text = expect_status(&h.router, get, StatusCode::SERVICE_UNAVAILABLE).await;
    assert_eq!(text, "Agent has not finished recovery");

    h.context.store.set_recovering(false);
    expect_status(
        &h.router,
        json_call(json!({ "type": "GET_HEALTH" })),
        StatusCode::OK,
    )
    .await;
}

#[tokio::test]
async fn test_http_authentication() {
    let config = AgentConfig {
        authenticate_http: true,
        credentials: vec![Credential {
            principal: "ops".to_string(),
            secret: "s3cret".to_string(),
        }],
        ..Default::default()
    };
    let h = harness_with(config, MockContainerizer::default(), None).await;

    let response = send(&h.router, json_call(json!({ "type": "GET_HEALTH" }))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));

    let mut request = json_call(json!({ "type": "GET_HEALTH" }));
    // "ops:s3cret"
    request.headers_mut().insert(
        "authorization",
        "Basic b3BzOnMzY3JldA==".parse().unwrap(),
    );
    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let state = Request::builder()
        .uri("/state")
        .body(Body::empty())
        .unwrap();
    expect_status(&h.router, state, StatusCode::UNAUTHORIZED).await;
}

#[tokio::test]
async fn test_launch_with_unknown_parent() {
    let h = harness(MockContainerizer::default(), None).await;
    let text = expect_status(
        &h.router,
        json_call(json!({
            "type": "LAUNCH_NESTED_CONTAINER",
            "launch_nested_container": {
                "container_id": nested_id("nobody", "child"),
                "command": { "shell": true, "value": "sleep 1" }
            }
        })),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(text, "Unable to locate executor for parent container nobody");
    assert_eq!(h.runtime.launches(), 0);
}

#[tokio::test]
async fn test_launch_wait_kill() {
    let h = harness(MockContainerizer::default(), None).await;
    let id = nested_id("exec", "job");

    expect_status(
        &h.router,
        json_call(json!({
            "type": "LAUNCH_NESTED_CONTAINER",
            "launch_nested_container": {
                "container_id": id.clone(),
                "command": { "shell": true, "value": "true" }
            }
        })),
        StatusCode::OK,
    )
    .await;
    assert_eq!(h.runtime.launches(), 1);

    let response = send(
        &h.router,
        json_call(json!({
            "type": "WAIT_NESTED_CONTAINER",
            "wait_nested_container": { "container_id": id.clone() }
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["type"], "WAIT_NESTED_CONTAINER");
    assert_eq!(body["wait_nested_container"]["exit_status"], 0);

    expect_status(
        &h.router,
        json_call(json!({
            "type": "KILL_NESTED_CONTAINER",
            "kill_nested_container": { "container_id": id }
        })),
        StatusCode::OK,
    )
    .await;
    assert_eq!(h.runtime.destroys(), 1);
}

#[tokio::test]
async fn test_launch_failure_destroys_once() {
    let h = harness(MockContainerizer::failing_launch(), None).await;
    expect_status(
        &h.router,
        json_call(json!({
            "type": "LAUNCH_NESTED_CONTAINER",
            "launch_nested_container": {
                "container_id": nested_id("exec", "broken"),
                "command": { "shell": true, "value": "true" }
            }
        })),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
    .await;
    assert_eq!(h.runtime.launches(), 1);
    assert_eq!(h.runtime.destroys(), 1);
}

#[tokio::test]
async fn test_denied_launch_never_reaches_runtime() {
    let authorizer = DenyActions::new(&[Action::LaunchNestedContainer]);
    let h = harness(MockContainerizer::default(), Some(Arc::new(authorizer))).await;

    expect_status(
        &h.router,
        json_call(json!({
            "type": "LAUNCH_NESTED_CONTAINER",
            "launch_nested_container": {
                "container_id": nested_id("exec", "denied"),
                "command": { "shell": true, "value": "true" }
            }
        })),
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(h.runtime.launches(), 0);
    assert_eq!(h.runtime.destroys(), 0);
}

#[tokio::test]
async fn test_nesting_depth_checked_before_lookup() {
    let h = harness(MockContainerizer::default(), None).await;
    let deep = json!({
        "value": "c",
        "parent": { "value": "b", "parent": { "value": "unknown" } }
    });

    let text = expect_status(
        &h.router,
        json_call(json!({
            "type": "WAIT_NESTED_CONTAINER",
            "wait_nested_container": { "container_id": deep }
        })),
        StatusCode::NOT_IMPLEMENTED,
    )
    .await;
    assert!(text.contains("'wait_nested_container.container_id.parent.parent' is set"));
}

#[tokio::test]
async fn test_unknown_container_not_found_before_authorization() {
    let authorizer = DenyActions::new(&[
        Action::WaitNestedContainer,
        Action::KillNestedContainer,
    ]);
    let h = harness(MockContainerizer::default(), Some(Arc::new(authorizer))).await;

    let text = expect_status(
        &h.router,
        json_call(json!({
            "type": "WAIT_NESTED_CONTAINER",
            "wait_nested_container": { "container_id": nested_id("elsewhere", "x") }
        })),
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(text, "Container elsewhere.x cannot be found");

    expect_status(
        &h.router,
        json_call(json!({
            "type": "KILL_NESTED_CONTAINER",
            "kill_nested_container": { "container_id": nested_id("elsewhere", "x") }
        })),
        StatusCode::NOT_FOUND,
    )
    .await;

    // Known containers reach the authorizer.
    expect_status(
        &h.router,
        json_call(json!({
            "type": "KILL_NESTED_CONTAINER",
            "kill_nested_container": { "container_id": nested_id("exec", "x") }
        })),
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(h.runtime.destroys(), 0);
}

#[tokio::test]
async fn test_session_output_eof_destroys_once() {
    let h = harness(MockContainerizer::with_output(&["hello\n", "world\n"]), None).await;
    let mut ended = h
        .context
        .events
        .subscribe_filtered(|event| event.key == events::SESSION_ENDED);
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .header("accept", "application/json+recordio")
        .body(Body::from(
            json!({
                "type": "LAUNCH_NESTED_CONTAINER_SESSION",
                "launch_nested_container_session": {
                    "container_id": nested_id("exec", "debug"),
                    "command": { "shell": true, "value": "echo hello" }
                }
            })
            .to_string(),
        ))
        .unwrap();

    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json+recordio"
    );

    let body = body_bytes(response).await;
    let records = json_records(&body);
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record["type"], "DATA");
        assert_eq!(record["data"]["type"], "STDOUT");
    }

    // The stream only ends after the destroy was issued.
    assert_eq!(h.runtime.launches(), 1);
    assert_eq!(h.runtime.destroys(), 1);

    let event = tokio::time::timeout(Duration::from_secs(5), ended.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.key, events::SESSION_ENDED);
}

#[tokio::test]
async fn test_session_client_disconnect_destroys_once() {
    let h = harness(MockContainerizer::with_held_output(&["hello\n"]), None).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .header("accept", "application/json+recordio")
        .body(Body::from(
            json!({
                "type": "LAUNCH_NESTED_CONTAINER_SESSION",
                "launch_nested_container_session": {
                    "container_id": nested_id("exec", "shell"),
                    "command": { "shell": true, "value": "sh" }
                }
            })
            .to_string(),
        ))
        .unwrap();

    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut stream = Box::pin(response.into_body().into_data_stream());
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(json_records(&first).len(), 1);
    assert_eq!(h.runtime.destroys(), 0);

    drop(stream);

    let destroyed = async {
        while h.runtime.destroys() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), destroyed)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.runtime.destroys(), 1);
    assert_eq!(h.runtime.launches(), 1);
}

#[tokio::test]
async fn test_session_requires_streaming_accept() {
    let h = harness(MockContainerizer::default(), None).await;
    expect_status(
        &h.router,
        json_call(json!({
            "type": "LAUNCH_NESTED_CONTAINER_SESSION",
            "launch_nested_container_session": {
                "container_id": nested_id("exec", "debug"),
                "command": { "shell": true, "value": "true" }
            }
        })),
        StatusCode::NOT_ACCEPTABLE,
    )
    .await;
    assert_eq!(h.runtime.launches(), 0);
}

#[tokio::test]
async fn test_attach_output_relays_records() {
    let h = harness(MockContainerizer::with_output(&["line\n"]), None).await;
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json")
        .header("accept", "application/json+recordio")
        .body(Body::from(
            json!({
                "type": "ATTACH_CONTAINER_OUTPUT",
                "attach_container_output": { "container_id": nested_id("exec", "job") }
            })
            .to_string(),
        ))
        .unwrap();

    let response = send(&h.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let records = json_records(&body_bytes(response).await);
    assert_eq!(records.len(), 1);
    assert_eq!(h.runtime.attaches(), 1);
    assert_eq!(h.runtime.destroys(), 0);
}

#[tokio::test]
async fn test_attach_input_requires_streaming_content_type() {
    let h = harness(MockContainerizer::default(), None).await;
    expect_status(
        &h.router,
        json_call(json!({
            "type": "ATTACH_CONTAINER_INPUT",
            "attach_container_input": {
                "type": "CONTAINER_ID",
                "container_id": nested_id("exec", "job")
            }
        })),
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
    )
    .await;
    assert_eq!(h.runtime.attaches(), 0);
}

#[tokio::test]
async fn test_attach_input_streams_records() {
    let h = harness(MockContainerizer::default(), None).await;
    let first = json!({
        "type": "ATTACH_CONTAINER_INPUT",
        "attach_container_input": {
            "type": "CONTAINER_ID",
            "container_id": nested_id("exec", "job")
        }
    });
    let data = json!({
        "type": "ATTACH_CONTAINER_INPUT",
        "attach_container_input": {
            "type": "PROCESS_IO",
            "process_io": { "type": "DATA", "data": { "type": "STDIN", "data": "aGk=" } }
        }
    });
    let mut body = Vec::new();
    body.extend_from_slice(&recordio::encode(first.to_string().as_bytes()));
    body.extend_from_slice(&recordio::encode(data.to_string().as_bytes()));

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1")
        .header("content-type", "application/json+recordio")
        .header("accept", "application/json")
        .body(Body::from(body))
        .unwrap();

    expect_status(&h.router, request, StatusCode::OK).await;
    assert_eq!(h.runtime.attaches(), 1);

    let input = h.runtime.input();
    assert_eq!(input.len(), 2);
    assert_eq!(input[0]["attach_container_input"]["type"], "CONTAINER_ID");
    assert_eq!(
        input[0]["attach_container_input"]["container_id"]["value"],
        "job"
    );
    assert_eq!(input[1]["attach_container_input"]["type"], "PROCESS_IO");
    assert_eq!(
        input[1]["attach_container_input"]["process_io"]["data"]["data"],
        "aGk="
    );
}

#[tokio::test]
async fn test_filtered_enumerations_agree() {
    let h = harness(
        MockContainerizer::default(),
        Some(Arc::new(DenyActions::hiding("beta-name"))),
    )
    .await;
    h.context
        .store
        .add_framework(framework_info("beta"))
        .await
        .unwrap();
    h.context
        .store
        .add_executor(executor_info("beta", "bex"), ContainerId::new("beta-exec"))
        .await
        .unwrap();
    h.context
        .store
        .queue_task(&FrameworkId::from("fw"), &ExecutorId::from("ex"), task_info("t-fw"))
        .await
        .unwrap();
    h.context
        .store
        .queue_task(
            &FrameworkId::from("beta"),
            &ExecutorId::from("bex"),
            task_info("t-beta"),
        )
        .await
        .unwrap();

    let state = body_json(send(&h.router, json_call(json!({ "type": "GET_STATE" }))).await).await;
    let frameworks =
        body_json(send(&h.router, json_call(json!({ "type": "GET_FRAMEWORKS" }))).await).await;
    let executors =
        body_json(send(&h.router, json_call(json!({ "type": "GET_EXECUTORS" }))).await).await;
    let tasks = body_json(send(&h.router, json_call(json!({ "type": "GET_TASKS" }))).await).await;
    let containers =
        body_json(send(&h.router, json_call(json!({ "type": "GET_CONTAINERS" }))).await).await;

    assert_eq!(state["get_state"]["get_tasks"], tasks["get_tasks"]);
    let queued = tasks["get_tasks"]["queued_tasks"].as_array().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["task_id"]["value"], "t-fw");

    assert_eq!(
        state["get_state"]["get_frameworks"],
        frameworks["get_frameworks"]
    );
    assert_eq!(state["get_state"]["get_executors"], executors["get_executors"]);

    let names: Vec<_> = frameworks["get_frameworks"]["frameworks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["framework_info"]["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["fw-name"]);

    // Container views are a separate action and see both executors.
    let containers = containers["get_containers"]["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0]["executor_name"], "ex-executor");
}

#[tokio::test]
async fn test_logging_level_round_trip() {
    let h = harness(MockContainerizer::default(), None).await;
    expect_status(
        &h.router,
        json_call(json!({
            "type": "SET_LOGGING_LEVEL",
            "set_logging_level": { "level": 1, "duration": { "nanoseconds": 60_000_000_000i64 } }
        })),
        StatusCode::OK,
    )
    .await;

    let body =
        body_json(send(&h.router, json_call(json!({ "type": "GET_LOGGING_LEVEL" }))).await).await;
    assert_eq!(body["get_logging_level"]["level"], 1);
}

#[tokio::test]
async fn test_set_logging_level_denied() {
    let authorizer = DenyActions::new(&[Action::SetLogLevel]);
    let h = harness(MockContainerizer::default(), Some(Arc::new(authorizer))).await;
    expect_status(
        &h.router,
        json_call(json!({
            "type": "SET_LOGGING_LEVEL",
            "set_logging_level": { "level": 2, "duration": { "nanoseconds": 1_000_000_000 } }
        })),
        StatusCode::FORBIDDEN,
    )
    .await;
    assert_eq!(h.context.logging.level(), 0);
}

#[tokio::test]
async fn test_api_calls_are_counted() {
    let h = harness(MockContainerizer::default(), None).await;
    send(&h.router, json_call(json!({ "type": "GET_HEALTH" }))).await;

    let body = body_json(
        send(
            &h.router,
            json_call(json!({ "type": "GET_METRICS", "get_metrics": {} })),
        )
        .await,
    )
    .await;
    let metrics = body["get_metrics"]["metrics"].as_array().unwrap();
    assert!(metrics
        .iter()
        .any(|m| m["name"].as_str().unwrap_or("").contains("api_calls")));
}
