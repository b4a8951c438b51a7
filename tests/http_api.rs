mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use marketplace_chat_backend::{build_app, models::Participant, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{app_state, business, customer, token};

struct Api {
    state: AppState,
    app: Router,
}

impl Api {
    fn new() -> Self {
        let state = app_state();
        let app = build_app(state.clone());
        Self { state, app }
    }

    async fn call(&self, as_who: Option<Participant>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(participant) = as_who {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token(&self.state, participant)),
            );
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn open(&self, requester: Participant, other: Participant) -> String {
        let (status, body) = self
            .call(
                Some(requester),
                Method::POST,
                "/api/v1/conversations",
                Some(json!({ "participant": other })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["id"].as_str().unwrap().to_string()
    }

    async fn send(&self, sender: Participant, conversation: &str, text: &str) -> Value {
        let (status, body) = self
            .call(
                Some(sender),
                Method::POST,
                &format!("/api/v1/conversations/{}/messages", conversation),
                Some(json!({ "body": text })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body
    }

    async fn list(&self, participant: Participant) -> Vec<Value> {
        let (status, body) = self
            .call(Some(participant), Method::GET, "/api/v1/conversations", None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body.as_array().cloned().unwrap_or_default()
    }
}

#[tokio::test]
async fn health_is_public() {
    let api = Api::new();
    let response = api
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    let api = Api::new();
    let (status, body) = api
        .call(None, Method::GET, "/api/v1/conversations", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = api
        .call(None, Method::GET, "/api/v1/conversations?access_token=garbage", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_in_query_string_is_accepted() {
    let api = Api::new();
    let c1 = customer();
    let uri = format!("/api/v1/conversations?access_token={}", token(&api.state, c1));
    let (status, body) = api.call(None, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn parallel_create_returns_one_conversation() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());

    let (first, second) = tokio::join!(api.open(c1, b1), api.open(c1, b1));
    assert_eq!(first, second);

    let from_business = api.open(b1, c1).await;
    assert_eq!(first, from_business);
    assert_eq!(api.list(c1).await.len(), 1);
    assert_eq!(api.list(b1).await.len(), 1);
}

#[tokio::test]
async fn conversation_with_self_is_invalid() {
    let api = Api::new();
    let c1 = customer();
    let (status, body) = api
        .call(
            Some(c1),
            Method::POST,
            "/api/v1/conversations",
            Some(json!({ "participant": c1 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
}

#[tokio::test]
async fn offline_messages_show_as_unread_until_marked() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());
    let conversation = api.open(b1, c1).await;

    for text in ["Your order shipped", "Tracking: 123", "Thanks!"] {
        api.send(b1, &conversation, text).await;
    }

    let listed = api.list(c1).await;
    assert_eq!(listed[0]["highest_seq"], 3);
    assert_eq!(listed[0]["read_through_seq"], 0);
    assert_eq!(listed[0]["unread_count"], 3);

    // Sender's own messages never count as unread
    assert_eq!(api.list(b1).await[0]["unread_count"], 0);

    let (status, messages) = api
        .call(
            Some(c1),
            Method::GET,
            &format!("/api/v1/conversations/{}/messages", conversation),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let seqs: Vec<i64> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    let (status, advance) = api
        .call(
            Some(c1),
            Method::POST,
            &format!("/api/v1/conversations/{}/read", conversation),
            Some(json!({ "through_seq": 3 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(advance["read_through_seq"], 3);
    assert_eq!(advance["unread_count"], 0);

    // A late, lower mark is a no-op rather than an error
    let (status, advance) = api
        .call(
            Some(c1),
            Method::POST,
            &format!("/api/v1/conversations/{}/read", conversation),
            Some(json!({ "through_seq": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(advance["read_through_seq"], 3);
    assert_eq!(advance["advanced"], false);

    assert_eq!(api.list(c1).await[0]["unread_count"], 0);
}

#[tokio::test]
async fn mark_read_past_highest_is_rejected() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());
    let conversation = api.open(c1, b1).await;
    api.send(b1, &conversation, "hello").await;

    let (status, _) = api
        .call(
            Some(c1),
            Method::POST,
            &format!("/api/v1/conversations/{}/read", conversation),
            Some(json!({ "through_seq": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pages_backwards_by_sequence() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());
    let conversation = api.open(c1, b1).await;
    for i in 0..5 {
        api.send(if i % 2 == 0 { c1 } else { b1 }, &conversation, &format!("m{}", i))
            .await;
    }

    let (_, page) = api
        .call(
            Some(c1),
            Method::GET,
            &format!("/api/v1/conversations/{}/messages?before_seq=5&limit=2", conversation),
            None,
        )
        .await;
    let seqs: Vec<i64> = page
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, vec![3, 4]);
}

#[tokio::test]
async fn outsiders_and_unknown_conversations() {
    let api = Api::new();
    let (c1, b1, c2) = (customer(), business(), customer());
    let conversation = api.open(c1, b1).await;

    let (status, _) = api
        .call(
            Some(c2),
            Method::GET,
            &format!("/api/v1/conversations/{}", conversation),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = api
        .call(
            Some(c2),
            Method::POST,
            &format!("/api/v1/conversations/{}/messages", conversation),
            Some(json!({ "body": "let me in" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = api
        .call(
            Some(c1),
            Method::GET,
            &format!("/api/v1/conversations/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_body_is_invalid() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());
    let conversation = api.open(c1, b1).await;
    let (status, _) = api
        .call(
            Some(c1),
            Method::POST,
            &format!("/api/v1/conversations/{}/messages", conversation),
            Some(json!({ "body": "  " })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleted_conversation_resurfaces_on_new_message() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());
    let conversation = api.open(c1, b1).await;
    api.send(b1, &conversation, "hello").await;

    let (status, body) = api
        .call(
            Some(c1),
            Method::DELETE,
            &format!("/api/v1/conversations/{}", conversation),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "hidden");
    assert!(api.list(c1).await.is_empty());
    assert_eq!(api.list(b1).await.len(), 1);

    api.send(b1, &conversation, "still there?").await;
    let listed = api.list(c1).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["unread_count"], 2);
}

#[tokio::test]
async fn deleting_on_both_sides_purges() {
    let api = Api::new();
    let (c1, b1) = (customer(), business());
    let conversation = api.open(c1, b1).await;
    api.send(c1, &conversation, "hello").await;

    let uri = format!("/api/v1/conversations/{}", conversation);
    let (_, first) = api.call(Some(c1), Method::DELETE, &uri, None).await;
    assert_eq!(first["outcome"], "hidden");
    let (_, second) = api.call(Some(b1), Method::DELETE, &uri, None).await;
    assert_eq!(second["outcome"], "purged");

    let (status, _) = api.call(Some(b1), Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Opening again starts from an empty log
    let reopened = api.open(c1, b1).await;
    assert_ne!(reopened, conversation);
    assert_eq!(api.list(c1).await[0]["highest_seq"], 0);
}
