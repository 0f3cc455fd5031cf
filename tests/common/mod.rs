#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use nemo::agent::{CompletionSource, FragmentStream};
use nemo::ai_sdk::ChatMessage;
use nemo::error::UpstreamError;
use nemo::server::{AppState, router};
use nemo::uploads::UploadStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// How a scripted stream ends after its fragments.
#[derive(Clone)]
pub enum Ending {
    Complete,
    Fail(String),
    Hang,
}

/// Completion source that replays fixed fragments and records what it saw.
pub struct ScriptedSource {
    fragments: Vec<String>,
    ending: Ending,
    reply: Result<String, String>,
    open_error: Option<String>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
    pub dropped: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn streaming(fragments: &[&str], ending: Ending) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            ending,
            reply: Ok(String::new()),
            open_error: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn replying(reply: Result<&str, &str>) -> Self {
        let mut source = Self::streaming(&[], Ending::Complete);
        source.reply = reply.map(str::to_string).map_err(str::to_string);
        source
    }

    pub fn refusing_to_open(message: &str) -> Self {
        let mut source = Self::streaming(&[], Ending::Complete);
        source.open_error = Some(message.to_string());
        source
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, messages: Vec<ChatMessage>) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(messages);
    }
}

// Flags the source when the relay lets go of its stream.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, UpstreamError> {
        self.record(messages);
        self.reply.clone().map_err(UpstreamError::Provider)
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, UpstreamError> {
        self.record(messages);
        if let Some(message) = &self.open_error {
            return Err(UpstreamError::Http {
                status: 401,
                body: message.clone(),
            });
        }

        let flag = DropFlag(Arc::clone(&self.dropped));
        let head = stream::iter(self.fragments.clone().into_iter().map(Ok));
        let tail: FragmentStream = match self.ending.clone() {
            Ending::Complete => Box::pin(stream::empty::<Result<String, UpstreamError>>()),
            Ending::Fail(message) => Box::pin(stream::iter([Err::<String, _>(
                UpstreamError::Transport(message),
            )])),
            Ending::Hang => Box::pin(stream::pending::<Result<String, UpstreamError>>()),
        };

        Ok(Box::pin(head.chain(tail).map(move |item| {
            let _held = &flag;
            item
        })))
    }
}

pub struct TestApp {
    pub base_url: String,
    pub source: Arc<ScriptedSource>,
    pub uploads: TempDir,
}

pub async fn spawn_app(source: ScriptedSource) -> TestApp {
    start(source, None).await
}

pub async fn spawn_app_with_public(source: ScriptedSource, public_dir: PathBuf) -> TestApp {
    start(source, Some(public_dir)).await
}

async fn start(source: ScriptedSource, public_dir: Option<PathBuf>) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let store = UploadStore::open(uploads.path()).await.unwrap();
    let source = Arc::new(source);
    let state = Arc::new(AppState::new(source.clone(), store, public_dir));
    let app = router(state, 1024 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base_url: format!("http://{}", addr),
        source,
        uploads,
    }
}
