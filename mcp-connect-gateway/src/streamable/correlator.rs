//! Correlation of backend output with the requests of one SSE stream.
//!
//! Pure state machine: no I/O, no channels. The stream pump feeds it session
//! events and writes whatever frames it returns.

use std::collections::HashSet;

use axum::response::sse::Event;
use mcp_connect_core::{JsonRpcMessage, JsonRpcMessageKind, classify_jsonrpc};
use serde_json::{Value, json};

/// Frame type written on the `event:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Message,
    Error,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameKind::Message => "message",
            FrameKind::Error => "error",
        }
    }
}

/// One SSE frame: `event`, stream-scoped `id`, JSON `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub id: u64,
    pub kind: FrameKind,
    pub data: Value,
}

impl SseFrame {
    /// Render as an axum SSE event (`event:`, `id:`, `data:` in that order).
    pub fn into_event(self) -> Event {
        Event::default()
            .event(self.kind.as_str())
            .id(self.id.to_string())
            .data(self.data.to_string())
    }
}

/// What the pump should do after feeding an input.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Frame to write, if any.
    pub frame: Option<SseFrame>,
    /// End the stream after writing `frame`.
    pub close: bool,
}

impl Step {
    fn emit(frame: SseFrame, close: bool) -> Self {
        Self {
            frame: Some(frame),
            close,
        }
    }

    fn close() -> Self {
        Self {
            frame: None,
            close: true,
        }
    }

    fn skip() -> Self {
        Self {
            frame: None,
            close: false,
        }
    }
}

/// Pending request ids and the event counter of one stream.
///
/// Ids are keyed by their rendered value, so a response echoing `"1"`
/// resolves a request sent with `1`.
#[derive(Debug)]
pub struct StreamCorrelator {
    pending: HashSet<String>,
    next_event_id: u64,
    closed: bool,
}

impl StreamCorrelator {
    /// Track the request ids of `batch`. Duplicate ids collapse to one entry.
    pub fn from_batch(batch: &[JsonRpcMessage]) -> Self {
        let pending = batch
            .iter()
            .filter_map(|message| match &message.kind {
                JsonRpcMessageKind::Request { id, .. } => Some(id.to_string()),
                _ => None,
            })
            .collect();
        Self {
            pending,
            next_event_id: 1,
            closed: false,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn frame(&mut self, kind: FrameKind, data: Value) -> SseFrame {
        let id = self.next_event_id;
        self.next_event_id += 1;
        SseFrame { id, kind, data }
    }

    /// Feed one message read from the backend.
    ///
    /// A response to a pending id resolves it; the stream closes right after
    /// the frame that resolves the last one. Responses to ids this stream is
    /// not waiting on belong to another stream of the session and are
    /// dropped. Everything else is forwarded without touching the pending set.
    pub fn on_message(&mut self, message: Value) -> Step {
        if self.closed {
            return Step::close();
        }

        let close = match classify_jsonrpc(&message) {
            Ok(JsonRpcMessageKind::Response { id }) => {
                if !self.pending.remove(&id.to_string()) {
                    return Step::skip();
                }
                self.pending.is_empty()
            }
            _ => false,
        };
        self.closed = close;
        Step::emit(self.frame(FrameKind::Message, message), close)
    }

    /// Feed a session or forwarding failure: one error frame, then close.
    pub fn on_error(&mut self, public_message: &str) -> Step {
        if self.closed {
            return Step::close();
        }
        self.closed = true;
        Step::emit(
            self.frame(FrameKind::Error, json!({ "error": public_message })),
            true,
        )
    }

    /// Session closed or client went away: close without a frame.
    pub fn on_closed(&mut self) -> Step {
        self.closed = true;
        Step::close()
    }
}
