//! Server-sent events plumbing shared by streaming backends.
//!
//! [`process_sse_stream`] owns the transport concerns (idle timeout, buffer
//! cap, UTF-8, event framing, `[DONE]`, repeated bad payloads, premature EOF);
//! an [`SseParser`] only maps one decoded JSON payload to stream events.

use std::fmt::Display;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use colloquy_types::StreamEvent;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

/// Locate the first blank-line event delimiter (`\n\n` or `\r\n\r\n`).
///
/// Returns the delimiter's start offset and its length.
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn drain_next_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_event_boundary(buffer)?;
    let mut event: Vec<u8> = buffer.drain(..pos + delim_len).collect();
    event.truncate(pos);
    Some(event)
}

/// Join the `data:` lines of one event with `\n`. `None` if the event has none.
fn extract_data(event: &str) -> Option<String> {
    let mut lines = event
        .lines()
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .peekable();
    lines.peek()?;
    Some(lines.collect::<Vec<_>>().join("\n"))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseParseAction {
    /// Nothing to emit for this payload.
    Continue,
    /// Emit these events in order. A terminal event ends the stream.
    Emit(Vec<StreamEvent>),
    Error(String),
}

pub(crate) trait SseParser {
    fn parse(&mut self, json: &serde_json::Value) -> SseParseAction;
    fn provider_name(&self) -> &'static str;
}

pub(crate) fn emit_or_continue(events: Vec<StreamEvent>) -> SseParseAction {
    if events.is_empty() {
        SseParseAction::Continue
    } else {
        SseParseAction::Emit(events)
    }
}

/// Returns `false` once the consumer has gone away.
async fn send_event(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Drive `stream` to completion, forwarding parsed events to `tx`.
///
/// Always ends with exactly one terminal event (`Done` or `Error`) unless the
/// receiver was dropped first.
pub(crate) async fn process_sse_stream<S, B, E, P>(
    mut stream: S,
    parser: &mut P,
    tx: &mpsc::Sender<StreamEvent>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
    P: SseParser,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            tracing::warn!(
                provider = parser.provider_name(),
                timeout_secs = idle_timeout.as_secs(),
                "SSE stream idle timeout"
            );
            let _ = send_event(tx, StreamEvent::Error("Stream idle timeout".to_string())).await;
            return;
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = send_event(tx, StreamEvent::Error(format!("Stream read failed: {e}"))).await;
                return;
            }
        };
        buffer.extend_from_slice(chunk.as_ref());

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            let _ = send_event(
                tx,
                StreamEvent::Error("SSE buffer exceeded maximum size (4 MiB)".to_string()),
            )
            .await;
            return;
        }

        while let Some(event) = drain_next_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }

            let Ok(event) = std::str::from_utf8(&event) else {
                let _ = send_event(
                    tx,
                    StreamEvent::Error("Received invalid UTF-8 from SSE stream".to_string()),
                )
                .await;
                return;
            };

            let Some(data) = extract_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                let _ = send_event(tx, StreamEvent::Done).await;
                return;
            }

            let json = match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(json) => {
                    parse_errors = 0;
                    json
                }
                Err(e) => {
                    parse_errors += 1;
                    tracing::warn!(
                        %e,
                        payload_bytes = data.len(),
                        provider = parser.provider_name(),
                        "Invalid SSE JSON payload"
                    );
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        let _ = send_event(
                            tx,
                            StreamEvent::Error(format!("Invalid stream payload: {e}")),
                        )
                        .await;
                        return;
                    }
                    continue;
                }
            };

            match parser.parse(&json) {
                SseParseAction::Continue => {}
                SseParseAction::Emit(events) => {
                    for event in events {
                        let terminal = event.is_terminal();
                        if !send_event(tx, event).await || terminal {
                            return;
                        }
                    }
                }
                SseParseAction::Error(msg) => {
                    let _ = send_event(tx, StreamEvent::Error(msg)).await;
                    return;
                }
            }
        }
    }

    let _ = send_event(
        tx,
        StreamEvent::Error("Connection closed before stream completed".to_string()),
    )
    .await;
}
