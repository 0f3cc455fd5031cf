//! Conversation as shown by the terminal client.
//!
//! Entries before the live one are settled and never change again. The live
//! entry is the assistant reply currently being received; it starts out as a
//! placeholder and is replaced in place by the first token.

use crate::client::BufferedReply;
use crate::protocol::StreamRecord;

pub const PLACEHOLDER_TEXT: &str = "\u{2026}NEMO is thinking...";
pub const EMPTY_REPLY_TEXT: &str = "(no response)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
    Notice,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub speaker: Speaker,
    pub text: String,
    pub placeholder: bool,
}

impl Entry {
    fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            placeholder: false,
        }
    }

    fn placeholder() -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: PLACEHOLDER_TEXT.to_string(),
            placeholder: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<Entry>,
    live: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of leading entries that are final.
    pub fn settled_len(&self) -> usize {
        self.live.unwrap_or(self.entries.len())
    }

    pub fn live(&self) -> Option<&Entry> {
        self.live.and_then(|idx| self.entries.get(idx))
    }

    pub fn in_flight(&self) -> bool {
        self.live.is_some()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Entry::new(Speaker::User, text));
    }

    pub fn push_attachment(&mut self, name: &str) {
        self.push(Entry::new(Speaker::User, format!("Attached file: {}", name)));
    }

    pub fn push_notice(&mut self, text: impl Into<String>) {
        self.push(Entry::new(Speaker::Notice, text));
    }

    /// Shows the placeholder for a reply that has just been requested.
    pub fn begin_exchange(&mut self) {
        if self.in_flight() {
            return;
        }
        self.entries.push(Entry::placeholder());
        self.live = Some(self.entries.len() - 1);
    }

    /// Applies one streamed record to the live reply. Returns whether the
    /// visible text changed.
    pub fn apply(&mut self, record: &StreamRecord) -> bool {
        let Some(entry) = self.live_mut() else {
            return false;
        };

        match record {
            StreamRecord::Token(token) => {
                if token.is_empty() {
                    return false;
                }
                reveal(entry);
                entry.text.push_str(token);
                true
            }
            StreamRecord::Done => false,
            StreamRecord::Error(message) => {
                reveal(entry);
                if !entry.text.is_empty() {
                    entry.text.push_str("\n\n");
                }
                entry.text.push_str("Error: ");
                entry.text.push_str(message);
                true
            }
        }
    }

    /// Settles the live reply once its stream has ended.
    pub fn finish_stream(&mut self) {
        if let Some(entry) = self.live_mut() {
            if entry.placeholder {
                entry.placeholder = false;
                entry.text = EMPTY_REPLY_TEXT.to_string();
            }
        }
        self.live = None;
    }

    /// Replaces the placeholder with a reply that arrived in one piece.
    pub fn show_reply(&mut self, reply: BufferedReply) {
        self.drop_placeholder();
        let entry = match reply {
            BufferedReply::Reply(text) if text.is_empty() => {
                Entry::new(Speaker::Assistant, EMPTY_REPLY_TEXT)
            }
            BufferedReply::Reply(text) => Entry::new(Speaker::Assistant, text),
            BufferedReply::Error(message) => {
                Entry::new(Speaker::Error, format!("Error: {}", message))
            }
        };
        self.live = None;
        self.entries.push(entry);
    }

    /// Ends the exchange with a single visible error. Text already received
    /// stays in the transcript.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.drop_placeholder();
        self.live = None;
        self.entries.push(Entry::new(Speaker::Error, message));
    }

    // New entries go before the live reply so the settled prefix stays contiguous.
    fn push(&mut self, entry: Entry) {
        match self.live {
            Some(idx) => {
                self.entries.insert(idx, entry);
                self.live = Some(idx + 1);
            }
            None => self.entries.push(entry),
        }
    }

    fn live_mut(&mut self) -> Option<&mut Entry> {
        self.live.and_then(|idx| self.entries.get_mut(idx))
    }

    fn drop_placeholder(&mut self) {
        if let Some(idx) = self.live {
            if self.entries.get(idx).is_some_and(|entry| entry.placeholder) {
                self.entries.remove(idx);
            }
        }
    }
}

fn reveal(entry: &mut Entry) {
    if entry.placeholder {
        entry.placeholder = false;
        entry.text.clear();
    }
}
