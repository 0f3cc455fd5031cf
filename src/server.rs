use crate::agent::{Agent, CompletionSource, conversation};
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::framer::spawn_relay;
use crate::protocol::{ChatReply, HealthResponse, StreamChatRequest};
use crate::uploads::{UploadStore, UploadedFile};
use axum::Json;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};
use uuid::Uuid;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson; charset=utf-8";
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

pub struct AppState {
    source: Arc<dyn CompletionSource>,
    uploads: UploadStore,
    public_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        source: Arc<dyn CompletionSource>,
        uploads: UploadStore,
        public_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            source,
            uploads,
            public_dir,
        }
    }
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;

    let agent = Agent::new(config.upstream)?;
    info!(model = agent.model(), "upstream configured");

    let uploads = UploadStore::open(&config.uploads_dir).await?;
    let public_dir = config.public_dir.filter(|dir| dir.is_dir());
    let state = Arc::new(AppState::new(Arc::new(agent), uploads, public_dir));

    let app = router(state, config.max_upload_bytes);

    info!("NEMO server running on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> axum::Router {
    let api = axum::Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
        .route("/health", get(health));

    let mut app = axum::Router::new()
        .nest("/api", api)
        .nest_service("/uploads", ServeDir::new(state.uploads.dir()));
    if let Some(public_dir) = &state.public_dir {
        app = app.fallback_service(ServeDir::new(public_dir));
    }

    app.layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, RelayError> {
    // Any body without a usable message is rejected the same way.
    let message = serde_json::from_slice::<StreamChatRequest>(&body)
        .inspect_err(|err| debug!(error = %err, "unreadable stream request body"))
        .ok()
        .and_then(|request| request.message)
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| RelayError::InvalidRequest("Message required".to_string()))?;

    let request_id = Uuid::new_v4().to_string();
    debug!(request_id = %request_id, chars = message.len(), "stream requested");

    let fragments = state
        .source
        .stream(conversation([message]))
        .await
        .map_err(RelayError::StreamOpen)?;

    let body = spawn_relay(fragments, request_id).map(Ok::<_, Infallible>);

    Ok((
        [
            (CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (CACHE_CONTROL, "no-cache, no-transform"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

struct Submission {
    message: Option<String>,
    file: Option<UploadedFile>,
}

impl Submission {
    async fn read(uploads: &UploadStore, multipart: &mut Multipart) -> Result<Self, RelayError> {
        let mut submission = Submission {
            message: None,
            file: None,
        };

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("message") => {
                    let text = field.text().await?;
                    submission.message = Some(text).filter(|text| !text.is_empty());
                }
                Some("file") => {
                    let Some(original_name) = field.file_name().map(str::to_string) else {
                        continue;
                    };
                    if original_name.is_empty() {
                        continue;
                    }
                    let mime_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let contents = field.bytes().await?;
                    let stored = uploads.store(&original_name, &mime_type, &contents).await?;
                    debug!(
                        original_name = %stored.original_name,
                        stored_name = %stored.stored_name,
                        size = stored.size,
                        "upload stored"
                    );
                    submission.file = Some(stored);
                }
                _ => {}
            }
        }

        Ok(submission)
    }

    fn user_turns(&self, origin: &str) -> Vec<String> {
        self.message
            .iter()
            .cloned()
            .chain(self.file.iter().map(|file| file.note(origin)))
            .collect()
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ChatReply>, RelayError> {
    let submission = Submission::read(&state.uploads, &mut multipart).await?;
    let messages = conversation(submission.user_turns(&request_origin(&headers)));

    let reply = state
        .source
        .complete(messages)
        .await
        .map_err(RelayError::Upstream)?;

    Ok(Json(ChatReply { reply }))
}

fn request_origin(headers: &HeaderMap) -> String {
    let scheme = headers
        .get(X_FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}
