//! Agent API Client Tests
//!
//! Runs the client against a mock LangGraph deployment: thread search with
//! its listing fallback, state extraction, bearer auth, and the resume call
//! including the flattened retry older servers need.

use mockito::{Matcher, Server};
use serde_json::json;

use crate::client::AgentClient;
use crate::client::types::{ActionKind, ResponseKind};
use crate::error::Error;

#[tokio::test]
async fn test_fetch_interrupts_end_to_end() {
    let mut server = Server::new_async().await;
    let search = server
        .mock("POST", "/threads/search")
        .match_body(Matcher::PartialJson(json!({
            "status": "interrupted",
            "limit": 20,
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"thread_id": "abc-123"}]).to_string())
        .create_async()
        .await;
    let state = server
        .mock("GET", "/threads/abc-123/state")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "metadata": {"assistant_id": "email-agent"},
                "tasks": [{
                    "interrupts": [{
                        "value": [{
                            "action_request": {
                                "action": "question",
                                "args": {"question": "Should I confirm the 3pm meeting?"},
                            },
                        }],
                    }],
                }],
            })
            .to_string(),
        )
        .create_async()
        .await;
    let history = server
        .mock("GET", "/threads/abc-123/history")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), None).unwrap();
    let interrupts = client.fetch_interrupts().await.unwrap();

    assert_eq!(interrupts.len(), 1);
    let data = &interrupts[0];
    assert_eq!(data.thread_id, "abc-123");
    assert_eq!(data.action_type, ActionKind::Question);
    assert_eq!(data.action_content, "Should I confirm the 3pm meeting?");
    assert_eq!(data.assistant_id.as_deref(), Some("email-agent"));
    search.assert_async().await;
    state.assert_async().await;
    history.assert_async().await;
}

#[tokio::test]
async fn test_search_falls_back_to_thread_listing() {
    let mut server = Server::new_async().await;
    let search = server
        .mock("POST", "/threads/search")
        .with_status(405)
        .create_async()
        .await;
    let listing = server
        .mock("GET", "/threads")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!([{"thread_id": "t-9"}]).to_string())
        .create_async()
        .await;
    let state = server
        .mock("GET", "/threads/t-9/state")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"values": {}, "tasks": []}).to_string())
        .create_async()
        .await;
    // No history endpoint at all; extraction must cope without it.
    let history = server
        .mock("GET", "/threads/t-9/history")
        .with_status(404)
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), None).unwrap();
    let interrupts = client.fetch_interrupts().await.unwrap();

    assert_eq!(interrupts.len(), 1);
    assert_eq!(interrupts[0].thread_id, "t-9");
    assert!(interrupts[0].action_type.is_unknown());
    search.assert_async().await;
    listing.assert_async().await;
    state.assert_async().await;
    history.assert_async().await;
}

#[tokio::test]
async fn test_api_key_sent_as_bearer_token() {
    let mut server = Server::new_async().await;
    let search = server
        .mock("POST", "/threads/search")
        .match_header("authorization", "Bearer secret-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), Some("secret-key".to_string())).unwrap();
    let interrupts = client.fetch_interrupts().await.unwrap();

    assert!(interrupts.is_empty());
    search.assert_async().await;
}

#[tokio::test]
async fn test_send_response_posts_resume_envelope() {
    let mut server = Server::new_async().await;
    let run = server
        .mock("POST", "/threads/t-1/runs/wait")
        .match_body(Matcher::PartialJson(json!({
            "command": {"resume": [{"type": "response", "args": "Approved, send it"}]},
            "assistant_id": "main",
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), None).unwrap();
    client
        .send_response(
            "t-1",
            ResponseKind::Respond,
            "Approved, send it",
            &ActionKind::Question,
            None,
        )
        .await
        .unwrap();
    run.assert_async().await;
}

#[tokio::test]
async fn test_send_response_retries_flattened_on_400() {
    let mut server = Server::new_async().await;
    // The matchers are disjoint: only the envelope carries "command", only
    // the flattened retry carries a top-level "type".
    let strict = server
        .mock("POST", "/threads/t-2/runs/wait")
        .match_body(Matcher::PartialJson(json!({
            "command": {"resume": [{"type": "accept"}]},
        })))
        .with_status(400)
        .with_body("unknown field: command")
        .create_async()
        .await;
    let flat = server
        .mock("POST", "/threads/t-2/runs/wait")
        .match_body(Matcher::PartialJson(json!({
            "type": "accept",
            "assistant_id": "main",
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), None).unwrap();
    client
        .send_response(
            "t-2",
            ResponseKind::Accept,
            "",
            &ActionKind::ResponseEmailDraft,
            None,
        )
        .await
        .unwrap();
    strict.assert_async().await;
    flat.assert_async().await;
}

#[tokio::test]
async fn test_send_response_rejects_disallowed_kind() {
    // Validation happens before any network traffic, so no server is needed.
    let client = AgentClient::new("http://127.0.0.1:9", None).unwrap();
    let err = client
        .send_response("t-3", ResponseKind::Accept, "", &ActionKind::Question, None)
        .await
        .unwrap_err();
    match err {
        Error::ResponseNotAllowed { action, response } => {
            assert_eq!(action, "Question");
            assert_eq!(response, "accept");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_verify_connectivity_health_endpoint() {
    let mut server = Server::new_async().await;
    let health = server
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), None).unwrap();
    assert!(client.verify_connectivity().await);
    health.assert_async().await;
}

#[test]
fn test_verify_connectivity_unreachable_is_false() {
    // Nothing listens on the discard port; the probe must come back false
    // instead of erroring out.
    let client = AgentClient::new("http://127.0.0.1:9", None).unwrap();
    assert!(!tokio_test::block_on(client.verify_connectivity()));
}

#[tokio::test]
async fn test_verify_connectivity_falls_back_to_base_url() {
    let mut server = Server::new_async().await;
    let health = server
        .mock("GET", "/health")
        .with_status(500)
        .create_async()
        .await;
    // A 404 from the base URL still proves something is listening there.
    let base = server
        .mock("GET", "/")
        .with_status(404)
        .create_async()
        .await;

    let client = AgentClient::new(&server.url(), None).unwrap();
    assert!(client.verify_connectivity().await);
    health.assert_async().await;
    base.assert_async().await;
}
