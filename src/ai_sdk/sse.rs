//! Server-Sent Events reader for streamed chat completions
//!
//! The upstream stream looks like:
//! ```text
//! data: {"choices":[{"delta":{"content":"He"}}]}
//!
//! data: {"choices":[{"delta":{"content":"llo"}}]}
//!
//! data: [DONE]
//! ```

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::Stream;

use crate::agent::FragmentStream;
use crate::decoder::Utf8Decoder;
use crate::error::UpstreamError;

use super::ChatCompletionChunk;

const DONE_SENTINEL: &str = "[DONE]";

/// Splits a byte stream into the `data:` payloads of complete events.
#[derive(Debug, Default)]
pub(crate) struct SseReader {
    utf8: Utf8Decoder,
    buffer: String,
}

impl SseReader {
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(chunk);
        self.buffer.push_str(&text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut payloads = Vec::new();
        while let Some(idx) = self.buffer.find("\n\n") {
            let raw_event: String = self.buffer.drain(..idx + 2).collect();
            if let Some(data) = extract_sse_data(&raw_event) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Payload of a final event that was not followed by a blank line.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let tail = self.utf8.finish();
        self.buffer.push_str(&tail);
        let raw_event = std::mem::take(&mut self.buffer);
        extract_sse_data(&raw_event)
    }
}

fn extract_sse_data(raw: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            data_lines.push(data.trim_start().to_string());
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

enum Payload {
    Fragment(Option<String>),
    Done,
}

fn parse_payload(data: &str) -> Result<Payload, UpstreamError> {
    if data.trim() == DONE_SENTINEL {
        return Ok(Payload::Done);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    if let Some(message) = chunk.error_message() {
        return Err(UpstreamError::Provider(message));
    }
    Ok(Payload::Fragment(chunk.into_fragment()))
}

/// Maps an upstream SSE body to the lazy sequence of text fragments it carries.
///
/// The sequence ends at `[DONE]` or when the body ends, and yields a single
/// error if the transfer or a payload fails.
pub(crate) fn fragment_stream<S>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut reader = SseReader::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(UpstreamError::Stream(e.to_string()));
                    return;
                }
            };

            for data in reader.feed(&chunk) {
                match parse_payload(&data) {
                    Ok(Payload::Fragment(Some(fragment))) => {
                        yield Ok(fragment);
                    }
                    Ok(Payload::Fragment(None)) => {}
                    Ok(Payload::Done) => return,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        if let Some(data) = reader.finish() {
            match parse_payload(&data) {
                Ok(Payload::Fragment(Some(fragment))) => {
                    yield Ok(fragment);
                }
                Ok(_) => {}
                Err(e) => {
                    yield Err(e);
                }
            }
        }
    })
}
