//! HTTP API integration tests
//!
//! Drives the axum router with `tower::ServiceExt::oneshot`: authentication,
//! conversation creation and listing, history, deletes, read markers, pending
//! deliveries, presence status and the health check.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;
use xfchat::backend::routes::create_router;

use crate::assert_ok;
use crate::common::{bearer, test_user, token_for, TestChat};

fn app(chat: &TestChat) -> Router {
    create_router(chat.state.clone())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = assert_ok!(axum::body::to_bytes(response.into_body(), usize::MAX).await);
    assert_ok!(serde_json::from_slice(&bytes))
}

fn get(uri: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    assert_ok!(builder.body(Body::empty()))
}

fn request(method: &str, uri: &str, authorization: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, authorization);
    match body {
        Some(body) => assert_ok!(builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))),
        None => assert_ok!(builder.body(Body::empty())),
    }
}

#[tokio::test]
async fn test_health_reports_connections() {
    let chat = TestChat::new();
    let _client = chat.connect(test_user()).await;

    let response = assert_ok!(app(&chat).oneshot(get("/health", None)).await);
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn test_missing_or_bad_token_is_unauthorized() {
    let chat = TestChat::new();

    let response = assert_ok!(app(&chat).oneshot(get("/api/v1/chat/pending", None)).await);
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], "unauthorized");

    let response = assert_ok!(
        app(&chat)
            .oneshot(get("/api/v1/chat/pending", Some("Bearer not-a-jwt")))
            .await
    );
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_conversation_includes_caller() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());

    let request = assert_ok!(Request::builder()
        .method("POST")
        .uri("/api/v1/conversations")
        .header(header::AUTHORIZATION, bearer(alice))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "participantIds": [bob.user_id] }).to_string())));
    let response = assert_ok!(app(&chat).oneshot(request).await);
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    let participants = body["participants"].as_array().cloned().unwrap_or_default();
    assert_eq!(participants.len(), 2);
    assert!(participants.contains(&json!(alice.user_id)));
    assert!(participants.contains(&json!(bob.user_id)));
    assert_eq!(body["nextSequence"], 1);
}

#[tokio::test]
async fn test_conversation_with_only_the_caller_is_rejected() {
    let chat = TestChat::new();
    let alice = test_user();

    let request = assert_ok!(Request::builder()
        .method("POST")
        .uri("/api/v1/conversations")
        .header(header::AUTHORIZATION, bearer(alice))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "participantIds": [alice.user_id] }).to_string())));
    let response = assert_ok!(app(&chat).oneshot(request).await);
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "invalid_conversation");
}

#[tokio::test]
async fn test_history_for_participants_only() {
    let chat = TestChat::new();
    let (alice, bob, outsider) = (test_user(), test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    for body in ["one", "two", "three"] {
        assert_ok!(chat.router.send(alice, conversation_id, body).await);
    }

    let uri = format!("/api/v1/conversations/{}/messages?from=2", conversation_id);
    let response = assert_ok!(app(&chat).oneshot(get(&uri, Some(&bearer(bob)))).await);
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let sequences: Vec<u64> = body["messages"]
        .as_array()
        .map(|messages| messages.iter().filter_map(|m| m["sequence"].as_u64()).collect())
        .unwrap_or_default();
    assert_eq!(sequences, vec![2, 3]);
    assert_eq!(body["nextSequence"], 4);

    let response = assert_ok!(app(&chat).oneshot(get(&uri, Some(&bearer(outsider)))).await);
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "not_participant");
}

#[tokio::test]
async fn test_history_of_unknown_conversation_is_not_found() {
    let chat = TestChat::new();
    let uri = format!("/api/v1/conversations/{}/messages", uuid::Uuid::new_v4());
    let response = assert_ok!(app(&chat).oneshot(get(&uri, Some(&bearer(test_user())))).await);
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pending_lists_queued_conversations() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    assert_ok!(chat.router.send(alice, conversation_id, "while you were out").await);

    // Token accepted from the query string as well
    let uri = format!("/api/v1/chat/pending?token={}", token_for(bob));
    let response = assert_ok!(app(&chat).oneshot(get(&uri, None)).await);
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body,
        json!([{ "conversationId": conversation_id, "count": 1, "lowest": 1, "highest": 1 }])
    );
}

#[tokio::test]
async fn test_user_status_follows_connections() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let uri = format!("/api/v1/users/{}/status", bob.user_id);

    let response = assert_ok!(app(&chat).oneshot(get(&uri, Some(&bearer(alice)))).await);
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["online"], false);
    assert_eq!(body["userId"], json!(bob.user_id));

    let _b = chat.connect(bob).await;
    let response = assert_ok!(app(&chat).oneshot(get(&uri, Some(&bearer(alice)))).await);
    assert_eq!(body_json(response).await["online"], true);
}

#[tokio::test]
async fn test_list_conversations_with_unread_counts() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    for body in ["one", "two", "three"] {
        assert_ok!(chat.router.send(alice, conversation_id, body).await);
    }

    let uri = format!("/api/v1/conversations/{}/read", conversation_id);
    let response = assert_ok!(
        app(&chat)
            .oneshot(request("POST", &uri, &bearer(bob), Some(json!({ "sequence": 1 }))))
            .await
    );
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["readThrough"], 1);

    let response = assert_ok!(app(&chat).oneshot(get("/api/v1/conversations", Some(&bearer(bob)))).await);
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["id"], json!(conversation_id));
    assert_eq!(body[0]["readThrough"], 1);
    assert_eq!(body[0]["unread"], 2);
    assert_eq!(body[0]["lastMessage"]["body"], "three");
    assert_eq!(body[0]["participants"].as_array().map(Vec::len), Some(2));

    let response = assert_ok!(
        app(&chat)
            .oneshot(get("/api/v1/conversations", Some(&bearer(test_user()))))
            .await
    );
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn test_delete_routes_for_self_and_everyone() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    for body in ["keep for alice", "gone for all"] {
        assert_ok!(chat.router.send(alice, conversation_id, body).await);
    }

    let uri = format!("/api/v1/conversations/{}/messages/1/self", conversation_id);
    let response = assert_ok!(app(&chat).oneshot(request("DELETE", &uri, &bearer(bob), None)).await);
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "deleted");

    let response = assert_ok!(app(&chat).oneshot(request("DELETE", &uri, &bearer(bob), None)).await);
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let uri = format!("/api/v1/conversations/{}/messages/2", conversation_id);
    let response = assert_ok!(app(&chat).oneshot(request("DELETE", &uri, &bearer(bob), None)).await);
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "not_author");

    let response = assert_ok!(app(&chat).oneshot(request("DELETE", &uri, &bearer(alice), None)).await);
    assert_eq!(response.status(), StatusCode::OK);

    let history = assert_ok!(chat.router.history(alice.user_id, conversation_id, None, None).await);
    assert_eq!(history.messages[0].body, "keep for alice");
    assert!(history.messages[1].is_tombstone());
}
