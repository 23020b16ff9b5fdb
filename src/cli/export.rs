// src/cli/export.rs - Transcript export
//
// Saves a conversation as pretty-printed JSON under the data directory.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::chat::message::Message;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Transcript<'a> {
    session_id: Option<&'a str>,
    exported_at: String,
    version: &'static str,
    messages: &'a [Message],
}

/// File name for a transcript: the session id, or a timestamp for a
/// session the server never named.
pub fn transcript_file_name(session_id: Option<&str>) -> String {
    let stem = match session_id {
        Some(id) if !id.is_empty() => id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect(),
        _ => format!("unsaved-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S")),
    };
    format!("{stem}.json")
}

/// Write the transcript into `dir`, creating it if needed.
pub fn save_transcript_to(
    dir: &Path,
    session_id: Option<&str>,
    messages: &[Message],
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(transcript_file_name(session_id));
    let transcript = Transcript {
        session_id,
        exported_at: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        messages,
    };
    std::fs::write(&path, serde_json::to_string_pretty(&transcript)?)?;
    tracing::info!(path = %path.display(), count = messages.len(), "transcript saved");
    Ok(path)
}

pub fn save_transcript(session_id: Option<&str>, messages: &[Message]) -> anyhow::Result<PathBuf> {
    save_transcript_to(&crate::infra::paths::transcripts_dir(), session_id, messages)
}
