// src/chat/decoder.rs - Incremental decoder for chat response bodies
//
// The chat endpoint does not announce its wire shape. A body is read as,
// in priority order:
//   1. one JSON object with `role: "assistant"` and string `content`
//      (checked against the whole buffered text after every read),
//   2. `data: <json>` / `data: [DONE]` event lines,
//   3. bare `{json}` lines,
//   4. plain text lines (appended with one trailing space each).
// The first terminal signal wins; anything after it is ignored.

use serde_json::Value;

use super::message::{MessagePatch, Source};

/// Shown when the stream ends without a single piece of content.
pub const EMPTY_RESPONSE_MESSAGE: &str = "I wasn't able to get an answer from the career assistant. \
This usually means one of the following:\n\
- the chat backend is misconfigured or not running\n\
- the assistant's API credentials are missing or invalid\n\
- the service is having a temporary outage\n\n\
Please try again in a moment.";

/// Shown when the request or the body read fails.
pub const RETRY_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";

const SSE_PREFIX: &str = "data: ";
const SSE_DONE: &str = "[DONE]";

/// A finished answer carried by a single JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub content: String,
    pub sources: Option<Vec<Source>>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// `{"type":"chunk","content":"..."}`
    Chunk(String),
    /// `{"type":"complete"}`
    Complete { sources: Option<Vec<Source>> },
    /// An object with string `content` and no `type`: replaces everything.
    Full(Reply),
    /// `{"type":"error","message":"..."}`
    Error(String),
    /// Carries nothing but (possibly) a session id.
    Session,
    Unknown(Option<String>),
}

/// A JSON event from the body, either behind `data: ` or on its own line.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub session_id: Option<String>,
}

/// One interpreted unit of a response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    CompleteJson(Reply),
    Sse(Event),
    SseDone,
    BareJson(Event),
    PlainText(String),
    Blank,
    Malformed(String),
}

/// What the decoder wants done to the streaming message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Append(String),
    Finish {
        content: Option<String>,
        sources: Option<Vec<Source>>,
    },
    Fail(String),
    SessionAssigned(String),
}

impl StreamUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamUpdate::Finish { .. } | StreamUpdate::Fail(_))
    }

    /// Message patch for this update; `None` for session assignment.
    pub fn to_patch(&self) -> Option<MessagePatch> {
        match self {
            StreamUpdate::Append(text) => Some(MessagePatch::append(text.clone())),
            StreamUpdate::Finish { content, sources } => {
                Some(MessagePatch::finish(content.clone(), sources.clone()))
            }
            StreamUpdate::Fail(text) => Some(MessagePatch::fail(text.clone())),
            StreamUpdate::SessionAssigned(_) => None,
        }
    }
}

fn session_id_of(v: &Value) -> Option<String> {
    v.get("sessionId")
        .or_else(|| v.get("session_id"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn sources_of(v: &Value) -> Option<Vec<Source>> {
    let raw = v.get("sources")?;
    match serde_json::from_value::<Vec<Source>>(raw.clone()) {
        Ok(sources) => Some(sources),
        Err(e) => {
            tracing::warn!("ignoring malformed sources: {e}");
            None
        }
    }
}

fn reply_of(v: &Value, content: &str) -> Reply {
    Reply {
        content: content.to_string(),
        sources: sources_of(v),
        session_id: session_id_of(v),
    }
}

/// Interpret a parsed JSON value as an event. `None` if it is not an object.
pub fn event_from_value(v: &Value) -> Option<Event> {
    if !v.is_object() {
        return None;
    }
    let content = v.get("content").and_then(Value::as_str);
    let kind = match v.get("type").and_then(Value::as_str) {
        Some("chunk") => match content {
            Some(c) => EventKind::Chunk(c.to_string()),
            None => EventKind::Unknown(Some("chunk".into())),
        },
        Some("complete") => EventKind::Complete {
            sources: sources_of(v),
        },
        Some("error") => EventKind::Error(
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .unwrap_or(RETRY_MESSAGE)
                .to_string(),
        ),
        Some("session") => EventKind::Session,
        Some(other) => EventKind::Unknown(Some(other.to_string())),
        None => match content {
            Some(c) => EventKind::Full(reply_of(v, c)),
            None if session_id_of(v).is_some() => EventKind::Session,
            None => EventKind::Unknown(None),
        },
    };
    Some(Event {
        kind,
        session_id: session_id_of(v),
    })
}

/// The whole-body fast path: the buffer is one assistant answer.
pub fn parse_complete_body(buffer: &str) -> Option<Reply> {
    let v: Value = serde_json::from_str(buffer.trim()).ok()?;
    if v.get("role").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    let content = v.get("content").and_then(Value::as_str)?;
    Some(reply_of(&v, content))
}

fn parse_json_event(text: &str) -> Result<Event, String> {
    let v: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    event_from_value(&v).ok_or_else(|| "not a JSON object".to_string())
}

/// Classify one complete line (without its `\n`).
pub fn parse_line(line: &str) -> Frame {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.trim().is_empty() {
        return Frame::Blank;
    }
    if let Some(rest) = line.strip_prefix(SSE_PREFIX) {
        if rest.trim() == SSE_DONE {
            return Frame::SseDone;
        }
        return match parse_json_event(rest) {
            Ok(event) => Frame::Sse(event),
            Err(e) => Frame::Malformed(e),
        };
    }
    if line.starts_with('{') {
        return match parse_json_event(line) {
            Ok(event) => Frame::BareJson(event),
            Err(e) => Frame::Malformed(e),
        };
    }
    Frame::PlainText(line.to_string())
}

/// Turns body bytes into [`StreamUpdate`]s for the active message.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    /// Undecoded tail of a multi-byte character split across reads.
    pending: Vec<u8>,
    buffer: String,
    has_received_content: bool,
    session_reported: bool,
    terminated: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed one read from the body.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamUpdate> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }
        self.decode_utf8(bytes);

        if let Some(reply) = parse_complete_body(&self.buffer) {
            self.buffer.clear();
            self.dispatch(Frame::CompleteJson(reply), &mut out);
            return out;
        }

        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            self.dispatch(parse_line(&line), &mut out);
            if self.terminated {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// The body ended normally.
    pub fn finish(&mut self) -> Vec<StreamUpdate> {
        let mut out = Vec::new();
        if self.terminated {
            return out;
        }
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&tail);
            self.pending.clear();
        }
        let residual = std::mem::take(&mut self.buffer);
        if !residual.trim().is_empty() {
            self.dispatch(parse_line(&residual), &mut out);
        }
        if !self.terminated {
            self.terminated = true;
            if self.has_received_content {
                out.push(StreamUpdate::Finish {
                    content: None,
                    sources: None,
                });
            } else {
                tracing::warn!("response ended without any content");
                out.push(StreamUpdate::Fail(EMPTY_RESPONSE_MESSAGE.to_string()));
            }
        }
        out
    }

    /// Reading the body failed.
    pub fn fail(&mut self) -> Vec<StreamUpdate> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;
        self.buffer.clear();
        vec![StreamUpdate::Fail(RETRY_MESSAGE.to_string())]
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(s) => {
                    self.buffer.push_str(s);
                    start = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = start + e.valid_up_to();
                    self.buffer
                        .push_str(std::str::from_utf8(&self.pending[start..valid]).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            start = valid + len;
                        }
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
    }

    fn report_session(&mut self, id: Option<String>, out: &mut Vec<StreamUpdate>) {
        if let Some(id) = id {
            if !self.session_reported {
                self.session_reported = true;
                out.push(StreamUpdate::SessionAssigned(id));
            }
        }
    }

    fn terminate(&mut self, update: StreamUpdate, out: &mut Vec<StreamUpdate>) {
        self.terminated = true;
        out.push(update);
    }

    fn dispatch(&mut self, frame: Frame, out: &mut Vec<StreamUpdate>) {
        tracing::trace!(?frame, "decoded frame");
        match frame {
            Frame::CompleteJson(reply) => self.apply_reply(reply, out),
            Frame::SseDone => self.terminate(
                StreamUpdate::Finish {
                    content: None,
                    sources: None,
                },
                out,
            ),
            Frame::Sse(event) | Frame::BareJson(event) => self.apply_event(event, out),
            Frame::PlainText(text) => {
                self.has_received_content = true;
                out.push(StreamUpdate::Append(format!("{text} ")));
            }
            Frame::Blank => {}
            Frame::Malformed(reason) => {
                tracing::warn!("skipping malformed chunk: {reason}");
            }
        }
    }

    fn apply_reply(&mut self, reply: Reply, out: &mut Vec<StreamUpdate>) {
        self.report_session(reply.session_id, out);
        self.has_received_content = true;
        self.terminate(
            StreamUpdate::Finish {
                content: Some(reply.content),
                sources: reply.sources,
            },
            out,
        );
    }

    fn apply_event(&mut self, event: Event, out: &mut Vec<StreamUpdate>) {
        match event.kind {
            EventKind::Full(reply) => self.apply_reply(reply, out),
            kind => {
                self.report_session(event.session_id, out);
                match kind {
                    EventKind::Chunk(content) => {
                        if !content.is_empty() {
                            self.has_received_content = true;
                            out.push(StreamUpdate::Append(content));
                        }
                    }
                    EventKind::Complete { sources } => self.terminate(
                        StreamUpdate::Finish {
                            content: None,
                            sources,
                        },
                        out,
                    ),
                    EventKind::Error(message) => {
                        self.terminate(StreamUpdate::Fail(message), out)
                    }
                    EventKind::Session | EventKind::Full(_) => {}
                    EventKind::Unknown(kind) => {
                        tracing::debug!(?kind, "ignoring unrecognised event");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed_all(decoder: &mut ChunkDecoder, reads: &[&str]) -> Vec<StreamUpdate> {
        let mut out = Vec::new();
        for r in reads {
            out.extend(decoder.feed(r.as_bytes()));
        }
        out.extend(decoder.finish());
        out
    }

    /// Fold updates into (content, terminal?, error?) the way the store would.
    fn render(updates: &[StreamUpdate]) -> (String, bool, bool) {
        let mut content = String::new();
        let mut done = false;
        let mut error = false;
        for u in updates {
            if done {
                break;
            }
            match u {
                StreamUpdate::Append(t) => content.push_str(t),
                StreamUpdate::Finish { content: c, .. } => {
                    if let Some(c) = c {
                        content = c.clone();
                    }
                    done = true;
                }
                StreamUpdate::Fail(t) => {
                    content = t.clone();
                    error = true;
                    done = true;
                }
                StreamUpdate::SessionAssigned(_) => {}
            }
        }
        (content, done, error)
    }

    // ─── Line classification ────────────────────────────────────

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(parse_line("data: [DONE]"), Frame::SseDone);
        assert_eq!(parse_line(""), Frame::Blank);
        assert_eq!(parse_line("  \r"), Frame::Blank);
        assert_eq!(parse_line("Hello"), Frame::PlainText("Hello".into()));
        assert!(matches!(
            parse_line(r#"data: {"type":"chunk","content":"a"}"#),
            Frame::Sse(Event { kind: EventKind::Chunk(ref c), .. }) if c == "a"
        ));
        assert!(matches!(
            parse_line(r#"{"type":"complete"}"#),
            Frame::BareJson(Event { kind: EventKind::Complete { .. }, .. })
        ));
        assert!(matches!(parse_line("data: {broken"), Frame::Malformed(_)));
        assert!(matches!(parse_line("data: [1,2]"), Frame::Malformed(_)));
    }

    #[test]
    fn test_parse_line_strips_carriage_return() {
        assert_eq!(parse_line("data: [DONE]\r"), Frame::SseDone);
        assert_eq!(parse_line("word\r"), Frame::PlainText("word".into()));
    }

    #[test]
    fn test_event_without_type_but_content_is_full_reply() {
        let v = serde_json::json!({
            "content": "Wind technicians are in demand.",
            "sources": [{"title": "BLS"}],
            "sessionId": "s-1"
        });
        let event = event_from_value(&v).unwrap();
        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        match event.kind {
            EventKind::Full(reply) => {
                assert_eq!(reply.content, "Wind technicians are in demand.");
                assert_eq!(reply.sources.unwrap()[0].title, "BLS");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_complete_body_requires_assistant_role() {
        assert!(parse_complete_body(r#"{"content":"hi","role":"assistant"}"#).is_some());
        assert!(parse_complete_body(r#"{"content":"hi","role":"user"}"#).is_none());
        assert!(parse_complete_body(r#"{"content":"hi"}"#).is_none());
        assert!(parse_complete_body(r#"{"content":5,"role":"assistant"}"#).is_none());
        assert!(parse_complete_body("data: {}").is_none());
    }

    // ─── Whole-body fast path ───────────────────────────────────

    #[test]
    fn test_whole_json_fast_path() {
        let mut d = ChunkDecoder::new();
        let updates = d.feed(br#"{"content":"hello","role":"assistant"}"#);
        assert_eq!(
            updates,
            vec![StreamUpdate::Finish {
                content: Some("hello".into()),
                sources: None
            }]
        );
        assert!(d.is_terminated());
        assert!(d.feed(b"\ndata: {\"type\":\"chunk\",\"content\":\"more\"}\n").is_empty());
        assert!(d.finish().is_empty());
    }

    #[test]
    fn test_whole_json_split_across_reads() {
        let mut d = ChunkDecoder::new();
        assert!(d.feed(br#"{"content":"hel"#).is_empty());
        let updates = d.feed(br#"lo","role":"assistant","sources":[{"title":"IPCC"}]}"#);
        let (content, done, error) = render(&updates);
        assert_eq!(content, "hello");
        assert!(done && !error);
        match &updates[0] {
            StreamUpdate::Finish { sources, .. } => {
                assert_eq!(sources.as_ref().unwrap()[0].title, "IPCC")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ─── SSE framing ────────────────────────────────────────────

    #[test]
    fn test_sse_chunk_accumulation() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "data: {\"type\":\"chunk\",\"content\":\"foo\"}\n",
                "data: {\"type\":\"chunk\",\"content\":\"bar\"}\n",
                "data: [DONE]\n",
            ],
        );
        assert_eq!(render(&updates), ("foobar".into(), true, false));
    }

    #[test]
    fn test_sse_line_split_across_reads() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "data: {\"type\":\"ch",
                "unk\",\"content\":\"solar \"}\n\nda",
                "ta: {\"type\":\"chunk\",\"content\":\"careers\"}\n\n",
                "data: {\"type\":\"complete\"}\n\n",
            ],
        );
        assert_eq!(render(&updates), ("solar careers".into(), true, false));
    }

    #[test]
    fn test_sse_full_object_replaces_content() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "data: {\"type\":\"chunk\",\"content\":\"draft\"}\n",
                "data: {\"content\":\"final answer\",\"sources\":[{\"title\":\"NREL\",\"url\":\"https://nrel.gov\"}]}\n",
            ],
        );
        assert_eq!(render(&updates), ("final answer".into(), true, false));
    }

    #[test]
    fn test_events_after_done_are_ignored() {
        let mut d = ChunkDecoder::new();
        let updates = d.feed(
            b"data: {\"type\":\"chunk\",\"content\":\"a\"}\ndata: [DONE]\ndata: {\"type\":\"chunk\",\"content\":\"b\"}\n",
        );
        assert_eq!(render(&updates), ("a".into(), true, false));
        assert_eq!(updates.len(), 2);
        assert!(d.feed(b"plain tail\n").is_empty());
    }

    #[test]
    fn test_malformed_line_does_not_abort_stream() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "data: {\"type\":\"chunk\",\"content\":\"ok \"}\n",
                "data: {not json}\n",
                "{also broken\n",
                "data: {\"type\":\"chunk\",\"content\":\"still\"}\n",
                "data: [DONE]\n",
            ],
        );
        assert_eq!(render(&updates), ("ok still".into(), true, false));
    }

    #[test]
    fn test_error_event_is_terminal_failure() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "data: {\"type\":\"chunk\",\"content\":\"partial\"}\n",
                "data: {\"type\":\"error\",\"message\":\"Model quota exceeded\"}\n",
            ],
        );
        assert_eq!(render(&updates), ("Model quota exceeded".into(), true, true));
    }

    // ─── Bare JSON and plain text ───────────────────────────────

    #[test]
    fn test_bare_json_chunks() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "{\"type\":\"chunk\",\"content\":\"x\"}\n{\"type\":\"chunk\",\"content\":\"y\"}\n",
                "{\"type\":\"complete\",\"sources\":[{\"title\":\"t\"}]}\n",
            ],
        );
        assert_eq!(render(&updates), ("xy".into(), true, false));
    }

    #[test]
    fn test_plain_text_fallback_keeps_content_at_end() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(&mut d, &["Hello\n", "world\n"]);
        assert_eq!(render(&updates), ("Hello world ".into(), true, false));
        assert!(d.is_terminated());
    }

    #[test]
    fn test_unterminated_last_line_is_flushed() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(&mut d, &["Hello\nwor", "ld"]);
        assert_eq!(render(&updates), ("Hello world ".into(), true, false));
    }

    #[test]
    fn test_json_body_without_role_handled_at_end() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(&mut d, &[r#"{"content":"Try a GIS course.","sources":[]}"#]);
        assert_eq!(render(&updates), ("Try a GIS course.".into(), true, false));
    }

    // ─── End of stream / failures ───────────────────────────────

    #[test]
    fn test_empty_stream_fallback() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(&mut d, &[]);
        assert_eq!(
            updates,
            vec![StreamUpdate::Fail(EMPTY_RESPONSE_MESSAGE.to_string())]
        );
    }

    #[test]
    fn test_only_separators_and_unknown_events_count_as_empty() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(&mut d, &["\n\n", "data: {\"type\":\"ping\"}\n\n"]);
        assert_eq!(render(&updates), (EMPTY_RESPONSE_MESSAGE.into(), true, true));
    }

    #[test]
    fn test_read_failure_after_terminal_is_ignored() {
        let mut d = ChunkDecoder::new();
        d.feed(b"data: [DONE]\n");
        assert!(d.fail().is_empty());

        let mut d = ChunkDecoder::new();
        d.feed(b"data: {\"type\":\"chunk\",\"content\":\"so far\"}\n");
        assert_eq!(d.fail(), vec![StreamUpdate::Fail(RETRY_MESSAGE.to_string())]);
        assert!(d.finish().is_empty());
    }

    // ─── Sessions and encoding ──────────────────────────────────

    #[test]
    fn test_session_id_reported_once() {
        let mut d = ChunkDecoder::new();
        let updates = feed_all(
            &mut d,
            &[
                "data: {\"type\":\"session\",\"sessionId\":\"abc\"}\n",
                "data: {\"type\":\"chunk\",\"content\":\"hi\",\"session_id\":\"other\"}\n",
                "data: [DONE]\n",
            ],
        );
        let sessions: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                StreamUpdate::SessionAssigned(id) => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(sessions, vec!["abc"]);
    }

    #[test]
    fn test_multibyte_character_split_across_reads() {
        let text = "data: {\"type\":\"chunk\",\"content\":\"Énergie ☀\"}\n";
        let bytes = text.as_bytes();
        let split = text.find('☀').unwrap() + 1;
        let mut d = ChunkDecoder::new();
        let mut updates = d.feed(&bytes[..split]);
        updates.extend(d.feed(&bytes[split..]));
        updates.extend(d.finish());
        assert_eq!(render(&updates).0, "Énergie ☀");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut d = ChunkDecoder::new();
        let mut updates = d.feed(b"caf\xff\n");
        updates.extend(d.finish());
        assert_eq!(render(&updates).0, "caf\u{FFFD} ");
    }

    #[test]
    fn test_update_patches() {
        assert!(StreamUpdate::SessionAssigned("s".into()).to_patch().is_none());
        assert!(!StreamUpdate::Append("a".into()).is_terminal());
        let p = StreamUpdate::Fail("x".into()).to_patch().unwrap();
        assert_eq!(p.error, Some(true));
    }
}
