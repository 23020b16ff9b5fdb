// tests/transport_test.rs - Integration test: HTTP transport against a local axum server

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use climatechat::chat::decoder::RETRY_MESSAGE;
use climatechat::chat::{Role, SessionCoordinator, TurnOutcome};
use climatechat::infra::config::{EndpointConfig, IdentityConfig};
use climatechat::infra::errors::ChatError;
use climatechat::transport::{ChatRequest, ChatTransport, HttpTransport, ProgressFn, UploadRequest};

#[derive(Debug, Default)]
struct Uploaded {
    file_name: Option<String>,
    mime_type: Option<String>,
    len: usize,
    user_id: Option<String>,
}

#[derive(Clone, Default)]
struct Seen {
    chat_bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
    upload: Arc<Mutex<Option<Uploaded>>>,
}

const STREAM: [&str; 4] = [
    "data: {\"type\":\"chunk\",\"content\":\"foo\"}\n",
    "\n",
    "data: {\"type\":\"chunk\",\"content\":\"bar\"}\n",
    "data: [DONE]\n",
];

async fn chat(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        seen.auth.lock().unwrap().push(auth.to_string());
    }
    seen.chat_bodies.lock().unwrap().push(body);

    let chunks = futures::stream::iter(
        STREAM
            .into_iter()
            .map(|c| Ok::<_, Infallible>(Bytes::from_static(c.as_bytes()))),
    );
    (
        [
            ("content-type", "text/event-stream"),
            ("x-session-id", "srv-1"),
        ],
        Body::from_stream(chunks),
    )
        .into_response()
}

async fn broken() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response()
}

async fn upload(State(seen): State<Seen>, mut multipart: Multipart) -> Response {
    let mut uploaded = Uploaded::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name().unwrap_or("") {
            "file" => {
                uploaded.file_name = field.file_name().map(str::to_string);
                uploaded.mime_type = field.content_type().map(str::to_string);
                uploaded.len = field.bytes().await.unwrap().len();
            }
            "userId" => uploaded.user_id = Some(field.text().await.unwrap()),
            _ => {}
        }
    }
    *seen.upload.lock().unwrap() = Some(uploaded);
    Json(json!({ "fileId": "f-77" })).into_response()
}

async fn history(Path(session_id): Path<String>) -> Response {
    if session_id != "s 1" {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    }
    Json(json!({
        "messages": [
            { "role": "user", "content": "How do I become an energy auditor?", "createdAt": "2026-01-02T10:00:00Z" },
            { "role": "assistant", "content": "Start with a BPI certification.", "sources": [{ "title": "BPI" }] }
        ]
    }))
    .into_response()
}

async fn serve(seen: Seen) -> String {
    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/broken/chat", post(broken))
        .route("/api/upload", post(upload))
        .route("/api/sessions/{session_id}/messages", get(history))
        .with_state(seen);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn transport(base_url: &str) -> HttpTransport {
    HttpTransport::new(
        EndpointConfig {
            base_url: base_url.into(),
            ..Default::default()
        },
        IdentityConfig {
            user_id: Some("seeker-1".into()),
            token: Some("tok".into()),
        },
    )
    .unwrap()
}

// ─── Chat turns ─────────────────────────────────────────────

#[tokio::test]
async fn test_send_streams_body_with_session_header() {
    let seen = Seen::default();
    let base = serve(seen.clone()).await;
    let t = transport(&base);

    let response = t
        .send(ChatRequest {
            message: "Which solar jobs need no degree?".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.session_id.as_deref(), Some("srv-1"));
    assert_eq!(response.content_type.as_deref(), Some("text/event-stream"));

    let mut body = Vec::new();
    let mut reads = response.body;
    while let Some(read) = reads.next().await {
        body.extend(read.unwrap());
    }
    assert_eq!(String::from_utf8(body).unwrap(), STREAM.concat());

    let sent = seen.chat_bodies.lock().unwrap()[0].clone();
    assert_eq!(
        sent,
        json!({
            "message": "Which solar jobs need no degree?",
            "sessionId": "",
            "userId": "seeker-1"
        })
    );
    assert_eq!(seen.auth.lock().unwrap()[0], "Bearer tok");
}

#[tokio::test]
async fn test_coordinator_over_http() {
    let base = serve(Seen::default()).await;
    let c = SessionCoordinator::new(Arc::new(transport(&base)));

    let outcome = c.submit("hi", vec![]).await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    let messages = c.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "foobar");
    assert_eq!(c.session_id().as_deref(), Some("srv-1"));
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let base = serve(Seen::default()).await;
    let t = HttpTransport::new(
        EndpointConfig {
            base_url: base,
            chat_path: "/broken/chat".into(),
            ..Default::default()
        },
        IdentityConfig::default(),
    )
    .unwrap();

    let err = t.send(ChatRequest::default()).await.unwrap_err();
    match &err {
        ChatError::Status { status, body, .. } => {
            assert_eq!(*status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(err.is_retriable());

    let c = SessionCoordinator::new(Arc::new(t));
    let outcome = c.submit("hi", vec![]).await.unwrap();
    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    let last = c.messages().pop().unwrap();
    assert_eq!(last.content, RETRY_MESSAGE);
    assert!(last.error);
}

#[tokio::test]
async fn test_unreachable_server_is_retriable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = transport(&format!("http://{addr}"))
        .send(ChatRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Transport { .. }));
    assert!(err.is_retriable());
}

// ─── Uploads ────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_is_multipart_with_progress() {
    let seen = Seen::default();
    let base = serve(seen.clone()).await;
    let t = transport(&base);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cv.pdf");
    std::fs::write(&path, vec![b'x'; 200 * 1024]).unwrap();

    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = reported.clone();
    let progress: ProgressFn = Arc::new(move |pct: u8| sink.lock().unwrap().push(pct));

    let file_ref = t
        .upload(
            UploadRequest {
                path,
                name: "cv.pdf".into(),
                mime_type: "application/pdf".into(),
                size_bytes: 200 * 1024,
            },
            progress,
        )
        .await
        .unwrap();
    assert_eq!(file_ref, "f-77");

    let uploaded = seen.upload.lock().unwrap().take().unwrap();
    assert_eq!(uploaded.file_name.as_deref(), Some("cv.pdf"));
    assert_eq!(uploaded.mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(uploaded.len, 200 * 1024);
    assert_eq!(uploaded.user_id.as_deref(), Some("seeker-1"));

    let reported = reported.lock().unwrap().clone();
    assert_eq!(reported.first(), Some(&0));
    assert_eq!(reported.last(), Some(&100));
    assert!(reported.windows(2).all(|w| w[0] <= w[1]));
    assert!(reported.iter().any(|p| *p > 0 && *p < 100));
}

// ─── History ────────────────────────────────────────────────

#[tokio::test]
async fn test_history_decodes_wrapped_list_and_encodes_id() {
    let base = serve(Seen::default()).await;
    let t = transport(&base);

    let messages = t.history("s 1").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].timestamp.to_rfc3339(), "2026-01-02T10:00:00+00:00");
    assert_eq!(messages[1].sources.as_ref().unwrap()[0].title, "BPI");

    assert!(matches!(
        t.history("nope").await,
        Err(ChatError::Status { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_load_session_over_http() {
    let base = serve(Seen::default()).await;
    let c = SessionCoordinator::new(Arc::new(transport(&base)));

    assert_eq!(c.load_session("s 1").await.unwrap(), 2);
    assert_eq!(c.session_id().as_deref(), Some("s 1"));
    assert!(c.messages().iter().all(|m| !m.is_streaming));
}
