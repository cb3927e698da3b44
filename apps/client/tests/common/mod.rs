//! In-process stand-in for the hosted backend: REST, auth and storage on an
//! axum fallback handler, plus a Phoenix-style realtime socket.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use client::{Backend, ClientConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const ANON_KEY: &str = "anon-key";
pub const ACCESS_TOKEN: &str = "user-jwt";
pub const PASSWORD: &str = "secret1";

#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw_len: usize,
}

/// Knobs for the failure paths.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub expires_in: i64,
    pub fail_mark_read: bool,
    pub fail_create: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            expires_in: 3600,
            fail_mark_read: false,
            fail_create: false,
        }
    }
}

#[derive(Clone)]
pub struct Mock {
    pub me: Uuid,
    pub peer: Uuid,
    seen: Arc<Mutex<Vec<Seen>>>,
    frames: Arc<Mutex<Vec<Value>>>,
    log: Arc<Mutex<Vec<String>>>,
    sockets: Arc<Mutex<Vec<mpsc::UnboundedSender<String>>>>,
    behaviour: Arc<Behaviour>,
}

impl Mock {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock seen requests").clone()
    }

    pub fn requests(&self, method: &str, path: &str) -> Vec<Seen> {
        self.seen()
            .into_iter()
            .filter(|s| s.method == method && s.path == path)
            .collect()
    }

    pub fn last(&self, method: &str, path: &str) -> Seen {
        self.requests(method, path)
            .pop()
            .unwrap_or_else(|| panic!("no {method} {path} request"))
    }

    /// REST calls and realtime frames in arrival order, as
    /// `"GET /rest/v1/messages"` or `"phx_join realtime:typing"`.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().expect("lock log").clone()
    }

    /// Realtime frames the client sent with `event`.
    pub fn frames(&self, event: &str) -> Vec<Value> {
        self.frames
            .lock()
            .expect("lock frames")
            .iter()
            .filter(|f| f["event"] == event)
            .cloned()
            .collect()
    }

    pub fn has_frame(&self, event: &str, topic: &str) -> bool {
        self.frames(event).iter().any(|f| f["topic"] == topic)
    }

    /// Sends a frame to every connected realtime socket.
    pub fn push(&self, frame: Value) {
        for socket in self.sockets.lock().expect("lock sockets").iter() {
            let _ = socket.send(frame.to_string());
        }
    }

    pub fn push_insert(&self, topic: &str, record: Value) {
        self.push(json!({
            "topic": topic,
            "event": "postgres_changes",
            "ref": null,
            "payload": {
                "data": {
                    "schema": "public",
                    "table": "messages",
                    "type": "INSERT",
                    "commit_timestamp": record["created_at"],
                    "record": record,
                    "errors": null
                },
                "ids": [1]
            }
        }));
    }

    pub fn push_typing(&self, user: Uuid) {
        self.push(json!({
            "topic": "realtime:typing",
            "event": "broadcast",
            "ref": null,
            "payload": { "type": "broadcast", "event": "typing", "payload": { "userId": user } }
        }));
    }
}

pub fn session(me: Uuid, expires_in: i64) -> Value {
    json!({
        "access_token": ACCESS_TOKEN,
        "token_type": "bearer",
        "expires_in": expires_in,
        "refresh_token": "refresh-1",
        "user": { "id": me, "email": "me@example.com", "user_metadata": { "full_name": "me" } }
    })
}

pub fn profile(id: Uuid, name: &str) -> Value {
    json!({ "id": id, "full_name": name, "phone_number": "5550100", "is_online": true, "is_guest": null })
}

pub fn row(id: u128, from: Uuid, to: Uuid, read: bool, at: &str) -> Value {
    json!({
        "id": Uuid::from_u128(id),
        "sender_id": from,
        "receiver_id": to,
        "content": format!("message {id}"),
        "content_type": "text",
        "file_url": null,
        "is_read": read,
        "created_at": at,
        "reactions": null
    })
}

pub fn header<'a>(seen: &'a Seen, name: &str) -> Option<&'a str> {
    seen.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn handle(
    State(mock): State<Mock>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query: HashMap<String, String> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let body_json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();

    mock.log
        .lock()
        .expect("lock log")
        .push(format!("{} {}", method.as_str(), path));
    mock.seen.lock().expect("lock seen requests").push(Seen {
        method: method.as_str().to_string(),
        path: path.clone(),
        query: query.clone(),
        headers: headers.clone(),
        body: body_json.clone(),
        raw_len: body.len(),
    });

    if headers.get("apikey").and_then(|v| v.to_str().ok()) != Some(ANON_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "No API key found in request" })),
        )
            .into_response();
    }

    let behaviour = mock.behaviour.clone();
    match (method.as_str(), path.as_str()) {
        ("POST", "/auth/v1/token") => match query.get("grant_type").map(String::as_str) {
            Some("password") if body_json["password"] == PASSWORD => {
                Json(session(mock.me, behaviour.expires_in)).into_response()
            }
            Some("password") => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" })),
            )
                .into_response(),
            Some("refresh_token") if body_json["refresh_token"] == "refresh-1" => {
                Json(session(mock.me, behaviour.expires_in)).into_response()
            }
            _ => StatusCode::BAD_REQUEST.into_response(),
        },
        ("POST", "/auth/v1/signup") => Json(json!({
            "id": mock.me,
            "email": body_json["email"],
            "user_metadata": body_json["data"]
        }))
        .into_response(),
        ("POST", "/auth/v1/logout") => StatusCode::NO_CONTENT.into_response(),
        ("GET", "/rest/v1/messages") => {
            let mut first = row(2, mock.me, mock.peer, true, "2024-05-01T10:00:20+00:00");
            first["sender"] = profile(mock.me, "me");
            first["receiver"] = profile(mock.peer, "Ada");
            let mut second = row(1, mock.peer, mock.me, false, "2024-05-01T10:00:10+00:00");
            second["sender"] = profile(mock.peer, "Ada");
            second["receiver"] = profile(mock.me, "me");
            Json(json!([first, second])).into_response()
        }
        ("POST", "/rest/v1/messages") if behaviour.fail_create => {
            (StatusCode::INTERNAL_SERVER_ERROR, "insert failed").into_response()
        }
        ("POST", "/rest/v1/messages") => {
            let mut stored = body_json.clone();
            stored["id"] = json!(Uuid::from_u128(99));
            stored["created_at"] = json!("2024-05-01T10:01:00+00:00");
            (StatusCode::CREATED, Json(json!([stored]))).into_response()
        }
        ("PATCH", "/rest/v1/messages") if query.contains_key("id") && body_json.get("reactions").is_some() => {
            let mut updated = row(2, mock.me, mock.peer, true, "2024-05-01T10:00:20+00:00");
            updated["reactions"] = body_json["reactions"].clone();
            Json(json!([updated])).into_response()
        }
        ("PATCH", "/rest/v1/messages") if behaviour.fail_mark_read => {
            (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response()
        }
        ("PATCH", "/rest/v1/messages") | ("PATCH", "/rest/v1/profiles") => StatusCode::NO_CONTENT.into_response(),
        ("POST", "/rest/v1/profiles") => StatusCode::CREATED.into_response(),
        ("GET", "/rest/v1/profiles") => match query.get("phone_number").map(String::as_str) {
            Some("eq.5550100") | Some("in.(5550100,5550199)") => {
                Json(json!([profile(mock.peer, "Ada")])).into_response()
            }
            Some(_) => Json(json!([])).into_response(),
            None => Json(profile(mock.peer, "Ada")).into_response(),
        },
        ("POST", "/rest/v1/rpc/get_or_create_guest_profile") => {
            Json(json!(Uuid::from_u128(77))).into_response()
        }
        ("POST", p) if p.starts_with("/storage/v1/object/chat-files/") => {
            Json(json!({ "Key": p.trim_start_matches("/storage/v1/object/") })).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn realtime(State(mock): State<Mock>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(mock, socket))
}

/// Records every client frame and acknowledges joins and heartbeats.
async fn serve_socket(mock: Mock, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    mock.sockets.lock().expect("lock sockets").push(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let event = frame["event"].as_str().unwrap_or_default().to_string();
        let topic = frame["topic"].as_str().unwrap_or_default().to_string();

        mock.log.lock().expect("lock log").push(format!("{event} {topic}"));
        mock.frames.lock().expect("lock frames").push(frame.clone());

        if event == "phx_join" || event == "heartbeat" {
            let reply = json!({
                "topic": topic,
                "event": "phx_reply",
                "ref": frame["ref"],
                "payload": { "status": "ok", "response": {} }
            });
            let _ = tx.send(reply.to_string());
        }
    }
    writer.abort();
}

pub async fn spawn_mock() -> (Mock, Backend) {
    spawn_mock_with(Behaviour::default(), |_| {}).await
}

pub async fn spawn_mock_with(
    behaviour: Behaviour,
    configure: impl FnOnce(&mut ClientConfig),
) -> (Mock, Backend) {
    let mock = Mock {
        me: Uuid::from_u128(1),
        peer: Uuid::from_u128(2),
        seen: Arc::new(Mutex::new(Vec::new())),
        frames: Arc::new(Mutex::new(Vec::new())),
        log: Arc::new(Mutex::new(Vec::new())),
        sockets: Arc::new(Mutex::new(Vec::new())),
        behaviour: Arc::new(behaviour),
    };
    let app = Router::new()
        .route("/realtime/v1/websocket", get(realtime))
        .fallback(handle)
        .with_state(mock.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve mock backend");
    });

    let mut config = ClientConfig::new(&format!("http://{addr}"), ANON_KEY).expect("client config");
    configure(&mut config);
    (mock, Backend::new(config).expect("backend"))
}

pub async fn signed_in() -> (Mock, Backend) {
    signed_in_with(Behaviour::default(), |_| {}).await
}

pub async fn signed_in_with(
    behaviour: Behaviour,
    configure: impl FnOnce(&mut ClientConfig),
) -> (Mock, Backend) {
    let (mock, backend) = spawn_mock_with(behaviour, configure).await;
    backend
        .sign_in("Me@Example.com", PASSWORD)
        .await
        .expect("sign in");
    (mock, backend)
}
