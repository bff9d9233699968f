//! In-process ebook-rs lookalike for engine tests.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Server timestamps start here and grow by one per upload.
pub const CLOCK_START: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
pub struct StoredBundle {
    pub archive: Vec<u8>,
    pub updated_at: i64,
    pub last_page: Option<i64>,
    pub percent_finished: Option<f64>,
}

#[derive(Debug)]
pub struct ServerState {
    /// `None` makes the manifest endpoint fail.
    pub manifest: Option<Value>,
    pub placeholder: Vec<u8>,
    pub book: Vec<u8>,
    pub bundles: BTreeMap<String, StoredBundle>,
    pub progress: HashMap<String, Value>,
    pub users: HashMap<String, String>,
    pub tokens: HashSet<String>,
    pub clock: i64,
    pub placeholder_hits: usize,
    pub logout_hits: usize,
    /// Stall before answering the manifest.
    pub delay: Option<Duration>,
    /// Make book downloads answer 500.
    pub fail_download: bool,
}

impl Default for ServerState {
    fn default() -> Self {
        let mut placeholder = b"%PDF-1.4\n% placeholder\n".to_vec();
        placeholder.resize(100, b' ');

        Self {
            manifest: Some(json!({ "books": [] })),
            placeholder,
            book: vec![b'B'; 600 * 1024],
            bundles: BTreeMap::new(),
            progress: HashMap::new(),
            users: HashMap::from([("alice".to_string(), "secret".to_string())]),
            tokens: HashSet::new(),
            clock: CLOCK_START,
            placeholder_hits: 0,
            logout_hits: 0,
            delay: None,
            fail_download: false,
        }
    }
}

pub type Shared = Arc<Mutex<ServerState>>;

pub struct FakeServer {
    pub url: String,
    pub state: Shared,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState::default()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn set_books(&self, books: Value) {
        self.state.lock().manifest = Some(json!({ "books": books }));
    }

    pub fn seed_bundle(&self, book_id: &str, bundle: StoredBundle) {
        self.state.lock().bundles.insert(book_id.to_string(), bundle);
    }
}

/// Server that promises a large body, sends a few bytes and hangs up.
/// Returns its base URL.
pub async fn truncating_server() -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      Content-Type: application/pdf\r\n\
                      Content-Length: 65536\r\n\r\n\
                      %PDF-1.4 partial",
                )
                .await;
            let _ = socket.shutdown().await;
        }
    });

    format!("http://{}", addr)
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/logout", post(logout))
        .route("/api/library", get(library))
        .route("/books/{id}/placeholder", get(placeholder))
        .route("/books/{id}/download", get(download))
        .route("/api/sync/sdr", get(list_bundles))
        .route("/api/sync/sdr/{id}", get(get_bundle).put(put_bundle))
        .route("/api/sync/sdr/{id}/info", get(bundle_info))
        .route("/api/sync/progress/{id}", get(get_progress).put(put_progress))
        .with_state(state)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| state.tokens.contains(token))
}

fn session(state: &mut ServerState, username: &str) -> Response {
    let token = format!("tok-{}", username);
    state.tokens.insert(token.clone());
    Json(json!({
        "token": token,
        "user_id": format!("u-{}", username),
        "username": username,
    }))
    .into_response()
}

async fn login(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock();
    let username = body["username"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default();

    if state.users.get(&username).map(String::as_str) != Some(password) {
        return error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    session(&mut state, &username)
}

async fn register(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock();
    let username = body["username"].as_str().unwrap_or_default().to_string();
    let password = body["password"].as_str().unwrap_or_default().to_string();

    if state.users.contains_key(&username) {
        return error(StatusCode::CONFLICT, "Username already exists");
    }
    state.users.insert(username.clone(), password);
    session(&mut state, &username)
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock();
    state.logout_hits += 1;
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        state.tokens.remove(token);
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn library(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let delay = state.lock().delay;
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    match &state.manifest {
        Some(manifest) => Json(manifest.clone()).into_response(),
        None => error(StatusCode::INTERNAL_SERVER_ERROR, "library unavailable"),
    }
}

async fn placeholder(State(state): State<Shared>, Path(_id): Path<String>) -> Response {
    let mut state = state.lock();
    state.placeholder_hits += 1;
    ([(header::CONTENT_TYPE, "application/pdf")], state.placeholder.clone()).into_response()
}

async fn download(State(state): State<Shared>, Path(_id): Path<String>) -> Response {
    let state = state.lock();
    if state.fail_download {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "storage offline");
    }
    ([(header::CONTENT_TYPE, "application/pdf")], state.book.clone()).into_response()
}

fn record(book_id: &str, bundle: &StoredBundle) -> Value {
    json!({
        "book_id": book_id,
        "updated_at": bundle.updated_at,
        "last_page": bundle.last_page,
        "percent_finished": bundle.percent_finished,
    })
}

async fn list_bundles(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let sdrs: Vec<Value> = state
        .bundles
        .iter()
        .map(|(id, bundle)| record(id, bundle))
        .collect();
    Json(json!({ "sdrs": sdrs })).into_response()
}

async fn get_bundle(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    match state.bundles.get(&id) {
        Some(bundle) => (
            [(header::CONTENT_TYPE, "application/gzip")],
            bundle.archive.clone(),
        )
            .into_response(),
        None => error(StatusCode::NOT_FOUND, "SDR not found"),
    }
}

async fn put_bundle(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    if body.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Empty archive");
    }

    let updated_at = state.clock;
    state.clock += 1;
    state.bundles.insert(
        id,
        StoredBundle {
            archive: body.to_vec(),
            updated_at,
            last_page: None,
            percent_finished: None,
        },
    );
    StatusCode::NO_CONTENT.into_response()
}

async fn bundle_info(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    let info = state.bundles.get(&id).map(|bundle| record(&id, bundle));
    Json(info).into_response()
}

async fn get_progress(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    Json(state.progress.get(&id).cloned()).into_response()
}

async fn put_progress(
    State(state): State<Shared>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    if !authorized(&state, &headers) {
        return error(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    body["book_id"] = json!(id);
    body["updated_at"] = json!(state.clock);
    state.progress.insert(id, body);
    StatusCode::NO_CONTENT.into_response()
}
