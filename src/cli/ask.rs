// src/cli/ask.rs - One-shot question and history replay

use std::path::PathBuf;

use crate::chat::attachments::AttachmentManager;
use crate::chat::session::{SessionCoordinator, TurnOutcome};

use super::chat::run_turn;
use super::progress::format_transcript;

/// Stage `attach`, ask `question`, stream the answer to stdout.
///
/// Attachments are checked before anything is sent, so a rejected file
/// costs no network call.
pub async fn run_ask(
    coordinator: &SessionCoordinator,
    attachments: &mut AttachmentManager,
    attach: &[PathBuf],
    question: &str,
    quiet: bool,
) -> anyhow::Result<()> {
    for path in attach {
        attachments.stage_path(path)?;
    }

    match run_turn(coordinator, attachments, question, quiet).await? {
        TurnOutcome::Completed { .. } => {
            if !quiet {
                if let Some(id) = coordinator.session_id() {
                    eprintln!("[session] continue with: climatechat chat --session {id}");
                }
            }
            Ok(())
        }
        TurnOutcome::Failed { .. } => anyhow::bail!("the assistant did not answer"),
        TurnOutcome::Aborted { .. } => anyhow::bail!("stopped before the answer finished"),
    }
}

/// Print the stored conversation of `session_id`.
pub async fn run_history(
    coordinator: &SessionCoordinator,
    session_id: &str,
    json: bool,
) -> anyhow::Result<()> {
    coordinator.load_session(session_id).await?;
    let messages = coordinator.messages();

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
    } else if messages.is_empty() {
        eprintln!("No messages in session {session_id}.");
    } else {
        print!("{}", format_transcript(&messages));
    }
    Ok(())
}
