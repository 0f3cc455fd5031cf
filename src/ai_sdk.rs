mod openai;
pub(crate) mod sse;

pub use openai::{ChatMessage, Role};
pub(crate) use openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
