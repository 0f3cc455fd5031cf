use crate::config::ClientConfig;
use crate::decoder::NdjsonDecoder;
use crate::error::ClientError;
use crate::protocol::{BufferedResponse, HealthResponse, StreamChatRequest, StreamRecord};
use futures::StreamExt;
use reqwest::Client as HttpClient;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::path::Path;
use tracing::debug;

type ClientResult<T> = Result<T, ClientError>;

/// A file read from disk, ready to be sent with the next message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub async fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ClientError::Attachment {
                path: path.display().to_string(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();

        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }
}

/// Outcome of `POST /api/chat` as the server reported it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferedReply {
    Reply(String),
    Error(String),
}

#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    http: HttpClient,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            base_url: config.base_url,
            http: HttpClient::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> ClientResult<bool> {
        let response = self
            .http
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(rejected("Health check failed", response).await);
        }
        let body: HealthResponse = response.json().await?;
        Ok(body.ok)
    }

    /// Sends a message, and optionally a file, in one multipart round trip.
    pub async fn send_buffered(
        &self,
        message: &str,
        attachment: Option<Attachment>,
    ) -> ClientResult<BufferedReply> {
        let mut form = Form::new().text("message", message.to_string());
        if let Some(attachment) = attachment {
            let part = Part::bytes(attachment.bytes)
                .file_name(attachment.name)
                .mime_str(&attachment.mime_type)?;
            form = form.part("file", part);
        }

        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<BufferedResponse>(&body) {
            Ok(BufferedResponse {
                error: Some(error), ..
            }) => Ok(BufferedReply::Error(error)),
            Ok(BufferedResponse {
                reply: Some(reply), ..
            }) if status.is_success() => Ok(BufferedReply::Reply(reply)),
            _ => Err(ClientError::Rejected {
                context: "Chat request failed",
                status: status.as_u16(),
                body,
            }),
        }
    }

    /// Streams a reply, handing each decoded record to `on_record` in order.
    pub async fn stream_chat<F, Fut>(&self, message: &str, mut on_record: F) -> ClientResult<()>
    where
        F: FnMut(StreamRecord) -> Fut,
        Fut: Future<Output = ()>,
    {
        let request = StreamChatRequest {
            message: Some(message.to_string()),
        };
        let response = self
            .http
            .post(format!("{}/api/chat/stream", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected("Stream request failed", response).await);
        }

        let mut stream = response.bytes_stream();
        let mut decoder = NdjsonDecoder::new();
        let mut records = 0usize;
        let mut finished = false;

        // Nothing after `done` or `error` belongs to this reply.
        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for record in decoder.push(&chunk) {
                records += 1;
                finished = record.is_terminal();
                on_record(record).await;
                if finished {
                    break 'read;
                }
            }
        }

        if !finished {
            if let Some(record) = decoder.finish() {
                records += 1;
                on_record(record).await;
            }
        }

        debug!(records, "stream closed");
        Ok(())
    }
}

async fn rejected(context: &'static str, response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::Rejected {
        context,
        status,
        body,
    }
}
