//! Reassembles a chunked `text/event-stream` response body into chat frames.
//!
//! The wire format is line-based: each frame is a single `data: <json>` line,
//! the sentinel `data: [DONE]` ends the logical stream, and anything else
//! (blank lines, comments) is ignored. Chunk boundaries fall anywhere,
//! including inside a multi-byte UTF-8 sequence, so lines are carved out of a
//! byte buffer and only complete lines are decoded.

use crate::transcript::TokenUsage;
use serde::Deserialize;

/// Holds the undelivered tail of the body between chunks. Split on `\n`
/// (never a UTF-8 continuation byte); a trailing `\r` is stripped. Whatever
/// is left when the transport ends is discarded, not treated as a frame.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one transport chunk and drain all complete lines.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// One streamed completion frame, as sent on a `data:` line.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatChunk {
    /// `choices[0].delta.content`, defaulting to empty.
    fn delta_content(&self) -> &str {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for more transport chunks.
    Reading,
    /// The `[DONE]` sentinel was seen; later frames are not processed.
    Done,
    /// The transport failed mid-stream; the turn is over.
    Errored,
}

/// Events produced by feeding one chunk, in frame order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A frame contributed `delta`; `text` is the full accumulated reply so
    /// far. The store upsert takes `text` (idempotent replace, not append).
    Delta { delta: String, text: String },
    /// The frame carried a usage object; replaces any previous snapshot.
    Usage(TokenUsage),
    /// The sentinel frame.
    Done,
}

/// State machine for one streaming turn. Owns the line buffer and the
/// accumulated assistant reply; exactly one instance is live per request.
#[derive(Debug)]
pub struct StreamTurn {
    lines: LineBuffer,
    response: String,
    usage: Option<TokenUsage>,
    state: TurnState,
}

impl Default for StreamTurn {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTurn {
    pub fn new() -> Self {
        Self {
            lines: LineBuffer::new(),
            response: String::new(),
            usage: None,
            state: TurnState::Reading,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Full assistant reply accumulated so far.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// Most recent usage snapshot (last write wins across frames).
    pub fn usage(&self) -> Option<TokenUsage> {
        self.usage
    }

    /// Process one transport chunk. Frames inside the chunk are handled
    /// left-to-right; a malformed frame is logged and skipped without
    /// corrupting the accumulator.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.state != TurnState::Reading {
            return events;
        }

        for line in self.lines.push(chunk) {
            let Some(rest) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = rest.trim();

            if payload == "[DONE]" {
                self.state = TurnState::Done;
                events.push(StreamEvent::Done);
                break;
            }

            let parsed: ChatChunk = match serde_json::from_str(payload) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed stream frame");
                    continue;
                }
            };

            self.response.push_str(parsed.delta_content());
            events.push(StreamEvent::Delta {
                delta: parsed.delta_content().to_string(),
                text: self.response.clone(),
            });

            if let Some(usage) = parsed.usage {
                self.usage = Some(usage);
                events.push(StreamEvent::Usage(usage));
            }
        }

        events
    }

    /// Mark the turn failed; no further frames will be processed.
    pub fn fail(&mut self) {
        self.state = TurnState::Errored;
    }

    /// Transport end-of-stream. Any unterminated tail in the line buffer is
    /// dropped here.
    pub fn finish(mut self) -> (String, Option<TokenUsage>) {
        if self.state == TurnState::Reading {
            self.state = TurnState::Done;
        }
        (std::mem::take(&mut self.response), self.usage)
    }
}
