//! In-process stand-ins for Google Drive and ffmpeg used by the tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{Path as UrlPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::TimeDelta;
use serde_json::{Value, json};

use crate::drive::auth::{AuthorizedUser, DRIVE_SCOPE};
use crate::util::time;

/// Folder the fake refuses uploads into.
pub const FORBIDDEN_FOLDER: &str = "readonlyFolder";

const VALID_TOKENS: [&str; 2] = ["stored-token", "fresh-token"];

#[derive(Debug, Clone)]
pub struct FakeUpload {
    pub name: String,
    pub parents: Vec<String>,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct FakeState {
    base_url: String,
    files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    sessions: Mutex<Vec<Value>>,
    uploads: Mutex<Vec<FakeUpload>>,
    token_requests: AtomicUsize,
    last_grant: Mutex<Option<String>>,
}

/// A fake Drive v3 API and OAuth token endpoint on a loopback port.
pub struct FakeDrive {
    pub base_url: String,
    state: Arc<FakeState>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeDrive {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(FakeState {
            base_url: base_url.clone(),
            ..Default::default()
        });

        let app = Router::new()
            .route("/token", post(token))
            .route("/drive/v3/files/{id}", get(file))
            .route("/upload/drive/v3/files", post(start_upload))
            .route("/upload/session/{n}", put(finish_upload))
            .with_state(Arc::clone(&state));
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            state,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn add_file(&self, id: &str, name: &str, bytes: &[u8]) {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(id.to_string(), (name.to_string(), bytes.to_vec()));
    }

    pub fn uploads(&self) -> Vec<FakeUpload> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    pub fn last_grant(&self) -> Option<String> {
        self.state.last_grant.lock().unwrap().clone()
    }
}

impl Drop for FakeDrive {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "error": { "code": status.as_u16(), "message": message } })),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| VALID_TOKENS.contains(&token))
}

async fn token(
    State(state): State<Arc<FakeState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let field = |name: &str| form.get(name).cloned().unwrap_or_default();
    let grant = field("grant_type");

    match grant.as_str() {
        "refresh_token" => {
            let refresh_token = field("refresh_token");
            *state.last_grant.lock().unwrap() = Some(format!("refresh_token:{refresh_token}"));
            if refresh_token == "revoked" {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "Token has been expired or revoked."
                    })),
                )
                    .into_response();
            }
            Json(json!({
                "access_token": "fresh-token",
                "expires_in": 3599,
                "scope": DRIVE_SCOPE,
                "token_type": "Bearer"
            }))
            .into_response()
        }
        "authorization_code" => {
            *state.last_grant.lock().unwrap() = Some(format!("authorization_code:{}", field("code")));
            Json(json!({
                "access_token": "fresh-token",
                "expires_in": 3599,
                "refresh_token": "refresh-from-code",
                "scope": DRIVE_SCOPE,
                "token_type": "Bearer"
            }))
            .into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unsupported_grant_type" })),
        )
            .into_response(),
    }
}

async fn file(
    State(state): State<Arc<FakeState>>,
    UrlPath(id): UrlPath<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return api_error(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    let Some((name, bytes)) = state.files.lock().unwrap().get(&id).cloned() else {
        return api_error(StatusCode::NOT_FOUND, &format!("File not found: {id}."));
    };

    if query.get("alt").map(String::as_str) == Some("media") {
        ([(header::CONTENT_TYPE, "video/mp4")], bytes).into_response()
    } else {
        Json(json!({ "name": name })).into_response()
    }
}

async fn start_upload(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(metadata): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return api_error(StatusCode::UNAUTHORIZED, "Invalid Credentials");
    }
    if query.get("uploadType").map(String::as_str) != Some("resumable") {
        return api_error(StatusCode::BAD_REQUEST, "Unsupported upload type.");
    }
    let forbidden = metadata["parents"]
        .as_array()
        .is_some_and(|parents| parents.iter().any(|p| p == FORBIDDEN_FOLDER));
    if forbidden {
        return api_error(
            StatusCode::FORBIDDEN,
            "The user does not have sufficient permissions for this file.",
        );
    }

    let mut sessions = state.sessions.lock().unwrap();
    sessions.push(metadata);
    let location = format!("{}/upload/session/{}", state.base_url, sessions.len() - 1);
    (StatusCode::OK, [(header::LOCATION, location)]).into_response()
}

async fn finish_upload(
    State(state): State<Arc<FakeState>>,
    UrlPath(n): UrlPath<usize>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(metadata) = state.sessions.lock().unwrap().get(n).cloned() else {
        return api_error(StatusCode::NOT_FOUND, "Upload session not found.");
    };
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let upload = FakeUpload {
        name: metadata["name"].as_str().unwrap_or_default().to_string(),
        parents: metadata["parents"]
            .as_array()
            .map(|p| p.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        mime_type,
        bytes: body.to_vec(),
    };

    let id = format!("mp3file{n}");
    let name = upload.name.clone();
    state.uploads.lock().unwrap().push(upload);
    Json(json!({
        "id": id,
        "name": name,
        "webViewLink": format!("https://drive.google.com/file/d/{id}/view"),
    }))
    .into_response()
}

/// HTTP client that never goes through a proxy from the environment.
pub fn test_http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Write a `token.json` whose token endpoint is the fake.
pub async fn write_token(dir: &Path, fake: &FakeDrive, expired: bool, refresh_token: &str) -> PathBuf {
    let offset = if expired {
        TimeDelta::hours(-1)
    } else {
        TimeDelta::hours(1)
    };
    let user = AuthorizedUser {
        token: Some("stored-token".to_string()),
        refresh_token: Some(refresh_token.to_string()),
        token_uri: fake.url("/token"),
        client_id: "client-1".to_string(),
        client_secret: "secret-1".to_string(),
        scopes: vec![DRIVE_SCOPE.to_string()],
        expiry: Some(time::now() + offset),
    };
    let path = dir.join("token.json");
    user.save(&path).await.unwrap();
    path
}

/// Behaviour of the shell script standing in for ffmpeg.
#[derive(Debug, Clone, Copy)]
pub enum FakeFfmpeg {
    /// Copy the input file to the output path.
    Copy,
    /// Print a decoder error and exit 1.
    Fail,
    /// Write its pid to `ffmpeg.pid` next to the script, then never finish.
    Hang,
}

/// Write an executable ffmpeg stand-in into `dir`.
#[cfg(unix)]
pub fn fake_ffmpeg(dir: &Path, behaviour: FakeFfmpeg) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let body = match behaviour {
        FakeFfmpeg::Copy => {
            r#"input=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
cp "$input" "$prev""#
        }
        FakeFfmpeg::Fail => {
            r#"echo "ffmpeg version fake" >&2
echo "in.mp4: Invalid data found when processing input" >&2
exit 1"#
        }
        FakeFfmpeg::Hang => {
            r#"echo $$ > "$(dirname "$0")/ffmpeg.pid"
exec sleep 30"#
        }
    };
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"-version\" ]; then\n  echo \"ffmpeg version fake\"\n  exit 0\nfi\n{body}\n"
    );

    let path = dir.join("ffmpeg");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    // Another test thread may have forked while the script was open for
    // writing; exec fails with ETXTBSY until that child execs too.
    for _ in 0..50 {
        match std::process::Command::new(&path).arg("-version").output() {
            Err(e) if e.raw_os_error() == Some(26) => {
                std::thread::sleep(std::time::Duration::from_millis(20))
            }
            _ => break,
        }
    }
    path
}
