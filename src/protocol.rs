use serde::{Deserialize, Serialize};

/// One NDJSON line of a streamed reply.
///
/// On the wire exactly one field is present: `{"token":"..."}`,
/// `{"done":true}` or `{"error":"..."}`. `Done` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireRecord", into = "WireRecord")]
pub enum StreamRecord {
    Token(String),
    Done,
    Error(String),
}

impl StreamRecord {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamRecord::Token(_))
    }

    /// Encodes the record as a single newline-terminated line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    done: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<StreamRecord> for WireRecord {
    fn from(record: StreamRecord) -> Self {
        match record {
            StreamRecord::Token(token) => WireRecord {
                token: Some(token),
                ..Default::default()
            },
            StreamRecord::Done => WireRecord {
                done: Some(true),
                ..Default::default()
            },
            StreamRecord::Error(error) => WireRecord {
                error: Some(error),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<WireRecord> for StreamRecord {
    type Error = String;

    fn try_from(wire: WireRecord) -> Result<Self, String> {
        match wire {
            WireRecord {
                token: Some(token), ..
            } => Ok(StreamRecord::Token(token)),
            WireRecord {
                done: Some(true), ..
            } => Ok(StreamRecord::Done),
            WireRecord {
                error: Some(error), ..
            } => Ok(StreamRecord::Error(error)),
            _ => Err("record carries none of token, done or error".to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

/// Body of `POST /api/chat`, which carries either field.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct BufferedResponse {
    #[serde(default)]
    pub(crate) reply: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}
