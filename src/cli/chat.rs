// src/cli/chat.rs - Interactive REPL

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::chat::attachments::{AttachmentManager, StagedFile, UploadObserver, UPLOAD_FAILED};
use crate::chat::session::{SessionCoordinator, TurnOutcome};
use crate::infra::config::Config;
use crate::infra::errors::ChatError;
use crate::util::format_size;

use super::export;
use super::progress::format_transcript;

/// Run the interactive chat REPL.
pub async fn run_chat(
    coordinator: &SessionCoordinator,
    attachments: &mut AttachmentManager,
    config: &Config,
    quiet: bool,
) -> anyhow::Result<()> {
    eprintln!(
        "climatechat v{} | {} | session: {}",
        env!("CARGO_PKG_VERSION"),
        config.endpoint.base_url,
        coordinator.session_id().as_deref().unwrap_or("new"),
    );
    if !quiet {
        eprintln!("Type /help for commands. Ctrl+C stops an answer or exits at the prompt.\n");
    }

    let mut turns = 0u32;
    let mut interrupted = false;
    loop {
        let read = async { tokio::task::spawn_blocking(read_input).await.ok().flatten() };
        let input = match next_input(read, tokio::signal::ctrl_c()).await {
            PromptInput::Line(line) => line,
            PromptInput::Eof => break,
            PromptInput::Interrupted => {
                interrupted = true;
                break;
            }
        };
        let trimmed = input.trim();

        if trimmed == "quit" || trimmed == "exit" || trimmed == "/quit" {
            break;
        }

        if trimmed.starts_with('/') {
            handle_slash_command(trimmed, coordinator, attachments, config).await;
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        match run_turn(coordinator, attachments, trimmed, quiet).await {
            Ok(TurnOutcome::Aborted { .. }) => {
                turns += 1;
                eprintln!("[stopped]");
            }
            Ok(_) => turns += 1,
            Err(e) if e.is_retriable() => eprintln!("[error] {e} (send again to retry)"),
            Err(e) => eprintln!("[error] {e}"),
        }
    }

    eprintln!(
        "\nSession {}: {} turn(s)",
        coordinator.session_id().as_deref().unwrap_or("(unnamed)"),
        turns,
    );
    if interrupted {
        // The stdin reader thread is still blocked on the abandoned prompt.
        std::process::exit(130);
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum PromptInput {
    Line(String),
    Eof,
    Interrupted,
}

/// Wait for the next prompt line or a Ctrl+C, whichever comes first.
/// A failed signal listener leaves only the read.
async fn next_input<R, I>(read: R, interrupt: I) -> PromptInput
where
    R: Future<Output = Option<String>>,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        line = read => line.map_or(PromptInput::Eof, PromptInput::Line),
        Ok(()) = interrupt => PromptInput::Interrupted,
    }
}

/// Upload pending attachments, then submit `text`. Ctrl+C during the turn
/// stops the answer and keeps whatever already arrived. Ctrl+C during the
/// uploads cancels the turn and leaves the files staged.
///
/// Nothing is sent while any staged file failed to upload.
pub async fn run_turn(
    coordinator: &SessionCoordinator,
    attachments: &mut AttachmentManager,
    text: &str,
    quiet: bool,
) -> Result<TurnOutcome, ChatError> {
    if attachments.has_pending_uploads() {
        let observer = upload_observer(attachments, quiet);
        let transport = coordinator.transport();
        let uploads = attachments.upload_pending(transport.as_ref(), observer);
        let summary = tokio::select! {
            summary = uploads => summary,
            Ok(()) = tokio::signal::ctrl_c() => {
                if !quiet {
                    eprintln!();
                }
                return Err(ChatError::Other(anyhow::anyhow!("upload cancelled")));
            }
        };
        if !quiet {
            eprintln!();
        }
        let mut failures = summary.failed.into_iter();
        if let Some((name, first)) = failures.next() {
            for (other, e) in failures {
                eprintln!("[upload] {other} failed: {e}");
            }
            eprintln!("[upload] {name} failed");
            return Err(first);
        }
    }

    let refs = attachments.ready_refs();
    let sent_files = !refs.is_empty();

    let turn = coordinator.submit(text, refs);
    tokio::pin!(turn);
    let outcome = tokio::select! {
        outcome = &mut turn => outcome,
        signal = tokio::signal::ctrl_c() => {
            if signal.is_ok() {
                coordinator.stop();
            }
            turn.await
        }
    }?;

    if sent_files {
        attachments.clear_sent();
    }
    Ok(outcome)
}

fn upload_observer(attachments: &AttachmentManager, quiet: bool) -> Option<UploadObserver> {
    if quiet {
        return None;
    }
    let names: HashMap<String, String> = attachments
        .staged()
        .iter()
        .map(|f| (f.id.clone(), f.candidate.name.clone()))
        .collect();
    let last = Mutex::new(String::new());
    let observer: UploadObserver = Arc::new(move |id: &str, pct: u8| {
        let name = names.get(id).map(String::as_str).unwrap_or(id);
        let lead = match last.lock() {
            Ok(mut last) if *last != id => {
                let lead = if last.is_empty() { "" } else { "\n" };
                *last = id.to_string();
                lead
            }
            _ => "",
        };
        eprint!("{lead}\r[upload] {name} {pct:>3}%");
    });
    Some(observer)
}

fn read_input() -> Option<String> {
    use std::io::{self, BufRead, Write};

    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut line = String::new();
    match stdin.lock().read_line(&mut line) {
        Ok(0) => None, // EOF
        Ok(_) => Some(line),
        Err(_) => None,
    }
}

/// Short upload state for `/files`.
fn upload_label(file: &StagedFile) -> String {
    if file.is_uploaded() {
        return "uploaded".into();
    }
    match file.upload_progress() {
        UPLOAD_FAILED => "failed".into(),
        0 => "pending".into(),
        pct => format!("{pct}%"),
    }
}

async fn handle_slash_command(
    input: &str,
    coordinator: &SessionCoordinator,
    attachments: &mut AttachmentManager,
    config: &Config,
) {
    let parts: Vec<&str> = input.splitn(2, ' ').collect();
    let cmd = parts[0];
    let arg = parts.get(1).map(|s| s.trim()).unwrap_or("");

    match cmd {
        "/new" => match coordinator.reset() {
            Ok(()) => eprintln!("  Started a new conversation."),
            Err(e) => eprintln!("  {e}"),
        },

        "/session" => {
            if arg.is_empty() {
                eprintln!(
                    "  Session: {}",
                    coordinator
                        .session_id()
                        .as_deref()
                        .unwrap_or("(not assigned yet)")
                );
                eprintln!("  Usage: /session <id> to load a stored conversation");
            } else {
                match coordinator.load_session(arg).await {
                    Ok(_) => print!("{}", format_transcript(&coordinator.messages())),
                    Err(e) => eprintln!("  Could not load session {arg}: {e}"),
                }
            }
        }

        "/attach" => {
            if arg.is_empty() {
                eprintln!("  Usage: /attach <path>");
                eprintln!(
                    "  Up to {} per file: {}",
                    format_size(attachments.policy().max_bytes()),
                    config.attachments.allowed_extensions.join(", "),
                );
            } else {
                match attachments.stage_path(Path::new(arg)) {
                    Ok(file) => {
                        let line = format!("{} ({})", file.candidate.name, file.size_label);
                        eprintln!("  Attached #{}: {line}", attachments.staged().len());
                    }
                    Err(e) => eprintln!("  {e}"),
                }
            }
        }

        "/detach" => {
            let target = arg
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| attachments.staged().get(i))
                .map(|f| f.id.clone());
            match target {
                Some(id) => match attachments.remove(&id) {
                    Ok(file) => eprintln!("  Removed {}", file.candidate.name),
                    Err(e) => eprintln!("  {e}"),
                },
                None => eprintln!("  Usage: /detach <n> (see /files)"),
            }
        }

        "/files" => {
            if attachments.is_empty() {
                eprintln!("  No files attached.");
            } else {
                for (i, f) in attachments.staged().iter().enumerate() {
                    eprintln!(
                        "  {}. {} | {} | {}",
                        i + 1,
                        f.candidate.name,
                        f.size_label,
                        upload_label(f)
                    );
                }
            }
        }

        "/history" => {
            let messages = coordinator.messages();
            if messages.is_empty() {
                eprintln!("  No messages in this conversation yet.");
            } else {
                print!("{}", format_transcript(&messages));
            }
        }

        "/save" => {
            let messages = coordinator.messages();
            if messages.is_empty() {
                eprintln!("  Nothing to save yet.");
            } else {
                match export::save_transcript(coordinator.session_id().as_deref(), &messages) {
                    Ok(path) => eprintln!("  Saved to {}", path.display()),
                    Err(e) => eprintln!("  Could not save transcript: {e}"),
                }
            }
        }

        "/status" => {
            eprintln!("  Endpoint: {}", config.endpoint.base_url);
            eprintln!(
                "  Session: {} | status: {:?}",
                coordinator.session_id().as_deref().unwrap_or("(not assigned yet)"),
                coordinator.status(),
            );
            eprintln!(
                "  Messages: {} | attached files: {}",
                coordinator.messages().len(),
                attachments.staged().len(),
            );
        }

        "/help" => {
            eprintln!("Slash commands:");
            eprintln!("  /new               Start a new conversation");
            eprintln!("  /session [id]      Show the session id, or load a stored one");
            eprintln!("  /attach <path>     Attach a file to the next message");
            eprintln!("  /detach <n>        Remove attached file n");
            eprintln!("  /files             List attached files");
            eprintln!("  /history           Show this conversation");
            eprintln!("  /save              Save this conversation as JSON");
            eprintln!("  /status            Show endpoint and session state");
            eprintln!("  /help              Show this help");
            eprintln!("  /quit, quit, exit  End session (or Ctrl+D, or Ctrl+C at the prompt)");
            eprintln!("Ctrl+C while an answer streams stops it and keeps the partial text.");
        }

        _ => {
            eprintln!("Unknown command: {}. Type /help for commands.", cmd);
        }
    }
}
