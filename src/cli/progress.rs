// src/cli/progress.rs - Terminal renderer for session events
//
// Answer text goes to stdout as it streams; status notices go to stderr so
// piping `climatechat ask` into a file captures only the answer.

use std::io::Write;
use std::sync::Mutex;

use crate::chat::message::{Message, Role};
use crate::chat::session::{SessionEvent, SessionObserver, StreamStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout(String),
    Stderr(String),
}

/// Tracks what was already printed for the streaming message, so a final
/// replacement or error is shown without repeating text.
#[derive(Debug, Default)]
pub struct Renderer {
    quiet: bool,
    streamed: String,
}

impl Renderer {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            streamed: String::new(),
        }
    }

    pub fn render(&mut self, event: &SessionEvent) -> Vec<Output> {
        let mut out = Vec::new();
        match event {
            SessionEvent::Status(StreamStatus::Processing) if !self.quiet => {
                out.push(Output::Stderr("[thinking]".into()));
            }
            SessionEvent::Status(_) => {}
            SessionEvent::SessionAssigned(id) if !self.quiet => {
                out.push(Output::Stderr(format!("[session] {id}")));
            }
            SessionEvent::SessionAssigned(_) => {}
            SessionEvent::MessageAdded(m) => {
                if m.role == Role::Assistant && m.is_streaming {
                    self.streamed.clear();
                } else if m.role == Role::Assistant && m.error {
                    out.push(Output::Stdout(format!("[error] {}\n", m.content)));
                }
            }
            SessionEvent::ContentAppended { delta, .. } => {
                self.streamed.push_str(delta);
                out.push(Output::Stdout(delta.clone()));
            }
            SessionEvent::MessageSettled(m) => {
                out.extend(self.settle(m));
            }
            SessionEvent::HistoryReplaced { session_id, count } if !self.quiet => {
                out.push(Output::Stderr(format!(
                    "[history] {count} message(s) in session {session_id}"
                )));
            }
            SessionEvent::HistoryReplaced { .. } => {}
            SessionEvent::Cleared if !self.quiet => {
                out.push(Output::Stderr("[new session]".into()));
            }
            SessionEvent::Cleared => {}
        }
        out
    }

    fn settle(&mut self, m: &Message) -> Vec<Output> {
        let streamed = std::mem::take(&mut self.streamed);
        let mut out = Vec::new();
        if m.error {
            let lead = if streamed.is_empty() { "" } else { "\n" };
            out.push(Output::Stdout(format!("{lead}[error] {}\n", m.content)));
            return out;
        }
        match m.content.strip_prefix(streamed.as_str()) {
            Some(rest) => out.push(Output::Stdout(format!("{rest}\n"))),
            None => out.push(Output::Stdout(format!("\n{}\n", m.content))),
        }
        if let Some(sources) = m.sources.as_ref().filter(|s| !s.is_empty()) {
            let mut text = String::from("Sources:");
            for (i, s) in sources.iter().enumerate() {
                text.push_str(&format!("\n  {}. {}", i + 1, s.title));
                if let Some(url) = &s.url {
                    text.push_str(&format!(" ({url})"));
                }
            }
            out.push(Output::Stdout(format!("{text}\n")));
        }
        out
    }
}

/// Observer that prints events to the terminal.
pub fn terminal_progress(quiet: bool) -> SessionObserver {
    let renderer = Mutex::new(Renderer::new(quiet));
    Box::new(move |event: &SessionEvent| {
        let outputs = match renderer.lock() {
            Ok(mut r) => r.render(event),
            Err(_) => return,
        };
        for output in outputs {
            match output {
                Output::Stdout(text) => {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
                Output::Stderr(text) => eprintln!("{text}"),
            }
        }
    })
}

/// Plain-text transcript of a conversation.
pub fn format_transcript(messages: &[Message]) -> String {
    let mut text = String::new();
    for m in messages {
        let who = match m.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        let flag = if m.error { " [error]" } else { "" };
        text.push_str(&format!(
            "[{}] {who}{flag}: {}\n",
            m.timestamp.format("%Y-%m-%d %H:%M"),
            m.content
        ));
        for a in &m.attachments {
            text.push_str(&format!("    attached {} ({})\n", a.name, a.size_label));
        }
    }
    text
}
