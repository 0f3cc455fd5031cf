//! Turns upstream fragments into an NDJSON response body.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::agent::FragmentStream;
use crate::protocol::StreamRecord;

/// Lifecycle of one streamed request.
///
/// `Done`, `Errored` and `Cancelled` are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    HeadersSent,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelayState::Done | RelayState::Errored | RelayState::Cancelled
        )
    }

    /// Returns the next state, or `None` if the transition is not allowed.
    pub fn advance(self, next: RelayState) -> Option<RelayState> {
        use RelayState::*;
        match (self, next) {
            (Idle, HeadersSent) | (HeadersSent, Streaming) => Some(next),
            // A client may leave before the first pull.
            (HeadersSent, Cancelled) => Some(next),
            (Streaming, Done | Errored | Cancelled) => Some(next),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub state: RelayState,
    pub tokens: usize,
}

/// Drives `fragments` into `sink` one line at a time.
///
/// Emits one `token` line per non-empty fragment, then `done` on exhaustion
/// or `error` on failure. When the receiving side of `sink` goes away the
/// upstream is no longer polled and nothing else is written.
pub async fn frame(mut fragments: FragmentStream, sink: mpsc::Sender<Bytes>) -> RelaySummary {
    let mut tokens = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.closed() => {
                return RelaySummary { state: RelayState::Cancelled, tokens };
            }
            next = fragments.next() => next,
        };

        let (record, outcome) = match next {
            Some(Ok(fragment)) if fragment.is_empty() => continue,
            Some(Ok(fragment)) => (StreamRecord::Token(fragment), None),
            Some(Err(err)) => {
                warn!(error = %err, tokens, "upstream failed mid-stream");
                (StreamRecord::Error(err.to_string()), Some(RelayState::Errored))
            }
            None => (StreamRecord::Done, Some(RelayState::Done)),
        };

        if sink.send(Bytes::from(record.to_line())).await.is_err() {
            return RelaySummary { state: RelayState::Cancelled, tokens };
        }

        match outcome {
            Some(state) => return RelaySummary { state, tokens },
            None => tokens += 1,
        }
    }
}

fn transition(state: &mut RelayState, next: RelayState, request_id: &str) {
    match state.advance(next) {
        Some(advanced) => *state = advanced,
        None => warn!(request_id, from = ?*state, to = ?next, "invalid relay transition ignored"),
    }
}

/// Starts framing on its own task and returns the body stream.
///
/// The channel holds a single line, so at most one fragment is in flight
/// between the upstream and the client.
pub fn spawn_relay(fragments: FragmentStream, request_id: String) -> ReceiverStream<Bytes> {
    let (sink, body) = mpsc::channel(1);
    let mut state = RelayState::Idle;
    transition(&mut state, RelayState::HeadersSent, &request_id);

    tokio::spawn(async move {
        transition(&mut state, RelayState::Streaming, &request_id);
        debug!(request_id = %request_id, "relay started");

        let summary = frame(fragments, sink).await;
        transition(&mut state, summary.state, &request_id);
        match state {
            RelayState::Cancelled => debug!(
                request_id = %request_id,
                tokens = summary.tokens,
                "client disconnected, relay stopped"
            ),
            finished if finished.is_terminal() => info!(
                request_id = %request_id,
                state = ?finished,
                tokens = summary.tokens,
                "relay finished"
            ),
            _ => warn!(
                request_id = %request_id,
                state = ?state,
                "relay ended before a terminal state"
            ),
        }
    });

    ReceiverStream::new(body)
}
