use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) temperature: f32,
    pub(crate) top_p: f32,
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub(crate) stream: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub(crate) choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseChoice {
    pub(crate) message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, empty when the provider returned none.
    pub(crate) fn reply_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default()
    }
}

/// One `data:` payload of a streamed completion.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub(crate) choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub(crate) error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub(crate) delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Delta {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

impl ChatCompletionChunk {
    pub(crate) fn into_fragment(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
    }

    pub(crate) fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        let message = error
            .get("message")
            .and_then(|message| message.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| match error {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn streaming_flag_only_serialized_when_set() {
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::system("be concise"), ChatMessage::user("hi")],
            temperature: 0.6,
            top_p: 0.95,
            max_tokens: 1024,
            stream: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("stream").is_none());
        assert_eq!(value["messages"][0], json!({"role": "system", "content": "be concise"}));
        assert_eq!(value["messages"][1]["role"], "user");

        let request = ChatCompletionRequest {
            stream: true,
            ..request
        };
        assert_eq!(serde_json::to_value(&request).unwrap()["stream"], true);
    }

    #[test]
    fn reply_text_takes_first_choice() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"role": "assistant", "content": "Hello"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        }))
        .unwrap();
        assert_eq!(response.reply_text(), "Hello");

        let empty: ChatCompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(empty.reply_text(), "");
    }

    #[test]
    fn chunk_fragment_and_error() {
        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "c1",
            "choices": [{"index": 0, "delta": {"content": "He"}, "finish_reason": null}]
        }))
        .unwrap();
        assert!(chunk.error_message().is_none());
        assert_eq!(chunk.into_fragment().as_deref(), Some("He"));

        let role_only: ChatCompletionChunk =
            serde_json::from_value(json!({"choices": [{"delta": {"role": "assistant"}}]})).unwrap();
        assert_eq!(role_only.into_fragment(), None);

        let failed: ChatCompletionChunk =
            serde_json::from_value(json!({"error": {"message": "overloaded", "code": 503}}))
                .unwrap();
        assert_eq!(failed.error_message().as_deref(), Some("overloaded"));
    }
}
