// src/chat/attachments.rs - Staging and pre-upload of files before a send
//
// Files are validated locally (size ceiling, allow-list) before anything
// touches the network. Accepted files are uploaded separately from the chat
// turn; the server's file reference, not the bytes, goes into the next send.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Arc;

use super::message::AttachmentRef;
use crate::infra::errors::{AttachmentError, ChatError};
use crate::transport::{ChatTransport, ProgressFn, UploadRequest};
use crate::util::format_size;

/// `upload_progress` value of a file whose upload failed.
pub const UPLOAD_FAILED: i8 = -1;

/// Size ceiling and accepted types for one call site. Entries in the allow
/// list are extensions (`pdf`) or MIME types (`application/pdf`, `image/*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPolicy {
    max_bytes: u64,
    allowed: Vec<String>,
}

impl AttachmentPolicy {
    pub fn new<S: AsRef<str>>(max_bytes: u64, allowed: &[S]) -> Self {
        Self {
            max_bytes,
            allowed: allowed
                .iter()
                .map(|a| a.as_ref().trim().trim_start_matches('.').to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn allows_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.allowed.iter().any(|a| *a == ext)
    }

    pub fn allows_mime(&self, mime: &str) -> bool {
        let mime = mime.to_lowercase();
        self.allowed.iter().filter(|a| a.contains('/')).any(|a| {
            match a.strip_suffix("/*") {
                Some(family) => mime.split('/').next() == Some(family),
                None => *a == mime,
            }
        })
    }

    pub fn validate(&self, candidate: &FileCandidate) -> Result<(), AttachmentError> {
        if candidate.size_bytes > self.max_bytes {
            return Err(AttachmentError::TooLarge {
                name: candidate.name.clone(),
                size_label: format_size(candidate.size_bytes),
                limit_label: format_size(self.max_bytes),
            });
        }
        let ext_ok = extension_of(&candidate.name).is_some_and(|e| self.allows_extension(&e));
        if !ext_ok && !self.allows_mime(&candidate.mime_type) {
            return Err(AttachmentError::UnsupportedType {
                name: candidate.name.clone(),
                allowed: self.allowed.join(", "),
            });
        }
        Ok(())
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

/// MIME type for a file name, by extension.
pub fn mime_for_name(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("rtf") => "application/rtf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// A file the user picked, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl FileCandidate {
    /// Candidate with a caller-declared size.
    pub fn declared(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            mime_type: mime_for_name(&name).to_string(),
            name,
            path,
            size_bytes,
        }
    }

    /// Candidate sized from the filesystem.
    pub fn from_path(path: &Path) -> Result<Self, AttachmentError> {
        let meta = std::fs::metadata(path).map_err(|source| AttachmentError::Unreadable {
            name: path.display().to_string(),
            source,
        })?;
        if !meta.is_file() {
            return Err(AttachmentError::Unreadable {
                name: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        Ok(Self::declared(path, meta.len()))
    }
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub id: String,
    pub candidate: FileCandidate,
    pub size_label: String,
    progress: Arc<AtomicI8>,
    file_ref: Option<String>,
}

impl StagedFile {
    /// `0..=100`, or [`UPLOAD_FAILED`].
    pub fn upload_progress(&self) -> i8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn file_ref(&self) -> Option<&str> {
        self.file_ref.as_deref()
    }

    pub fn is_uploaded(&self) -> bool {
        self.file_ref.is_some()
    }

    fn to_ref(&self) -> AttachmentRef {
        AttachmentRef {
            name: self.candidate.name.clone(),
            mime_type: self.candidate.mime_type.clone(),
            size_label: self.size_label.clone(),
            file_ref: self.file_ref.clone(),
        }
    }
}

/// Outcome of [`AttachmentManager::upload_pending`].
#[derive(Debug, Default)]
pub struct UploadSummary {
    pub uploaded: usize,
    pub failed: Vec<(String, ChatError)>,
}

/// Called with `(staged file id, percent)` while uploads run.
pub type UploadObserver = Arc<dyn Fn(&str, u8) + Send + Sync>;

#[derive(Debug)]
pub struct AttachmentManager {
    policy: AttachmentPolicy,
    staged: Vec<StagedFile>,
}

impl AttachmentManager {
    pub fn new(policy: AttachmentPolicy) -> Self {
        Self {
            policy,
            staged: Vec::new(),
        }
    }

    pub fn policy(&self) -> &AttachmentPolicy {
        &self.policy
    }

    /// Validate and stage a file. Rejected files are never staged.
    pub fn stage(&mut self, candidate: FileCandidate) -> Result<&StagedFile, AttachmentError> {
        if let Err(e) = self.policy.validate(&candidate) {
            tracing::debug!(name = %candidate.name, "attachment rejected: {e}");
            return Err(e);
        }
        let staged = StagedFile {
            id: uuid::Uuid::new_v4().simple().to_string(),
            size_label: format_size(candidate.size_bytes),
            candidate,
            progress: Arc::new(AtomicI8::new(0)),
            file_ref: None,
        };
        self.staged.push(staged);
        Ok(&self.staged[self.staged.len() - 1])
    }

    pub fn stage_path(&mut self, path: &Path) -> Result<&StagedFile, AttachmentError> {
        let candidate = FileCandidate::from_path(path)?;
        self.stage(candidate)
    }

    pub fn remove(&mut self, id: &str) -> Result<StagedFile, AttachmentError> {
        let pos = self
            .staged
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| AttachmentError::NotStaged(id.to_string()))?;
        Ok(self.staged.remove(pos))
    }

    pub fn staged(&self) -> &[StagedFile] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    pub fn has_pending_uploads(&self) -> bool {
        self.staged.iter().any(|f| !f.is_uploaded())
    }

    /// Upload every staged file that has no server reference yet. Failed
    /// files stay staged with progress [`UPLOAD_FAILED`].
    pub async fn upload_pending(
        &mut self,
        transport: &dyn ChatTransport,
        observer: Option<UploadObserver>,
    ) -> UploadSummary {
        let mut summary = UploadSummary::default();
        for file in self.staged.iter_mut().filter(|f| !f.is_uploaded()) {
            file.progress.store(0, Ordering::Relaxed);

            let progress = file.progress.clone();
            let id = file.id.clone();
            let observer = observer.clone();
            let on_progress: ProgressFn = Arc::new(move |pct: u8| {
                progress.store(pct.min(100) as i8, Ordering::Relaxed);
                if let Some(observe) = &observer {
                    observe(&id, pct);
                }
            });

            let request = UploadRequest {
                path: file.candidate.path.clone(),
                name: file.candidate.name.clone(),
                mime_type: file.candidate.mime_type.clone(),
                size_bytes: file.candidate.size_bytes,
            };
            match transport.upload(request, on_progress).await {
                Ok(file_ref) => {
                    file.progress.store(100, Ordering::Relaxed);
                    file.file_ref = Some(file_ref);
                    summary.uploaded += 1;
                }
                Err(e) => {
                    tracing::warn!(name = %file.candidate.name, "upload failed: {e}");
                    file.progress.store(UPLOAD_FAILED, Ordering::Relaxed);
                    summary.failed.push((file.candidate.name.clone(), e));
                }
            }
        }
        summary
    }

    /// References for every uploaded file, in staging order.
    pub fn ready_refs(&self) -> Vec<AttachmentRef> {
        self.staged
            .iter()
            .filter(|f| f.is_uploaded())
            .map(StagedFile::to_ref)
            .collect()
    }

    /// Drop uploaded files once the message referencing them was sent.
    pub fn clear_sent(&mut self) {
        self.staged.retain(|f| !f.is_uploaded());
    }
}
