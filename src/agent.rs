use async_trait::async_trait;
use futures::stream::Stream;
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;

use crate::ai_sdk::sse::fragment_stream;
use crate::ai_sdk::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

pub const SYSTEM_INSTRUCTION: &str = "You are NEMO, a helpful assistant. Be concise and polite. If a file is attached, reference its name and preview/link provided by the server.";

/// Lazy, single-pass sequence of reply fragments. Dropping it stops pulling.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// The model behind the relay, either as one buffered reply or as fragments.
#[async_trait]
pub trait CompletionSource: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, UpstreamError>;

    /// Opens a streamed completion. Errors here happen before any fragment.
    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, UpstreamError>;
}

/// System instruction followed by the given user turns.
pub fn conversation<I, S>(user_turns: I) -> Vec<ChatMessage>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    std::iter::once(ChatMessage::system(SYSTEM_INSTRUCTION))
        .chain(user_turns.into_iter().map(ChatMessage::user))
        .collect()
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct Agent {
    client: Client,
    config: UpstreamConfig,
}

impl Agent {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request(&self, messages: Vec<ChatMessage>, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }

    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionSource for Agent {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, UpstreamError> {
        let response = self.send(&self.request(messages, false)).await?;
        let body: ChatCompletionResponse = response.json().await?;
        Ok(body.reply_text())
    }

    async fn stream(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, UpstreamError> {
        let response = self.send(&self.request(messages, true)).await?;
        Ok(fragment_stream(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sdk::Role;

    #[test]
    fn conversation_starts_with_system_instruction() {
        let messages = conversation(["hi", "File attached: a.txt"]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, SYSTEM_INSTRUCTION);
        assert_eq!(messages[1], ChatMessage::user("hi"));
        assert_eq!(messages[2].content, "File attached: a.txt");
    }

    #[test]
    fn conversation_without_user_turns() {
        let messages = conversation(Vec::<String>::new());
        assert_eq!(messages, vec![ChatMessage::system(SYSTEM_INSTRUCTION)]);
    }

    #[test]
    fn request_carries_sampling_parameters() {
        let config = UpstreamConfig::from_api_key(Some("k".to_string())).unwrap();
        let agent = Agent::new(config).unwrap();
        let request = agent.request(conversation(["hi"]), true);
        assert_eq!(request.model, agent.model());
        assert_eq!(request.max_tokens, 1024);
        assert_eq!(request.temperature, 0.6);
        assert_eq!(request.top_p, 0.95);
        assert!(request.stream);
    }
}
