//! Collaborators that receive what the engine produces: progress snapshots,
//! the final report, downloaded media.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    bulk::{
        ledger::{ProgressUpdate, RunReport},
        types::Target,
    },
    domain::{MediaRef, MessageRef},
    remote::types::DownloadedMedia,
    Result,
};

/// Receives one update per recorded outcome while a run is in progress.
///
/// Called on worker tasks right after each outcome is recorded; implementations
/// must return promptly.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, total: usize, update: &ProgressUpdate);
}

/// Receives the final report for export.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn persist(&self, report: &RunReport) -> Result<()>;
}

/// Stores the bytes of a downloaded media item; returns where it went.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn store(
        &self,
        target: &Target,
        message: MessageRef,
        media: &MediaRef,
        downloaded: DownloadedMedia,
    ) -> Result<String>;
}

/// Logs a progress line every `every` records and on the last one.
pub struct LogProgressSink {
    every: usize,
    seen: AtomicUsize,
}

impl LogProgressSink {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            seen: AtomicUsize::new(0),
        }
    }
}

impl ProgressSink for LogProgressSink {
    fn on_progress(&self, total: usize, update: &ProgressUpdate) {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        let c = update.counts;
        if n % self.every != 0 && c.attempted != total {
            return;
        }
        tracing::info!(
            "progress {}/{}: {} ok, {} skipped, {} failed",
            c.attempted,
            total,
            c.succeeded,
            c.skipped,
            c.failed
        );
    }
}

/// Writes each report as pretty JSON into a directory.
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, report: &RunReport) -> PathBuf {
        self.dir.join(format!(
            "report-{}.json",
            report.finished_at.format("%Y%m%dT%H%M%S%.3fZ")
        ))
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn persist(&self, report: &RunReport) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(report);
        let json = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&path, json).await?;
        tracing::info!("report written to {}", path.display());
        Ok(())
    }
}

/// Saves media under `<root>/<chat folder>/`.
pub struct DirMediaStore {
    root: PathBuf,
    chat_folder: String,
}

impl DirMediaStore {
    /// `chat_name` becomes the folder name after sanitizing.
    pub fn new(root: impl Into<PathBuf>, chat_name: &str) -> Self {
        let mut chat_folder = sanitize_folder_name(chat_name);
        if chat_folder.is_empty() {
            chat_folder = "chat".to_string();
        }
        Self {
            root: root.into(),
            chat_folder,
        }
    }

    pub fn folder(&self) -> PathBuf {
        self.root.join(&self.chat_folder)
    }

    fn file_name(message: MessageRef, media: &MediaRef, downloaded: &DownloadedMedia) -> String {
        let from_remote = downloaded
            .file_name
            .as_deref()
            .or(media.file_name.as_deref())
            .and_then(|n| Path::new(n).file_name())
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty());

        // Prefix with the message id so two "image.jpg" never collide.
        match from_remote {
            Some(name) => format!("{}_{}", message.message_id.0, name),
            None => format!(
                "{}_{}.{}",
                message.chat_id.0.unsigned_abs(),
                message.message_id.0,
                media.extension()
            ),
        }
    }
}

#[async_trait]
impl MediaStore for DirMediaStore {
    async fn store(
        &self,
        _target: &Target,
        message: MessageRef,
        media: &MediaRef,
        downloaded: DownloadedMedia,
    ) -> Result<String> {
        let dir = self.folder();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(Self::file_name(message, media, &downloaded));
        tokio::fs::write(&path, &downloaded.bytes).await?;
        Ok(path.display().to_string())
    }
}

/// Keep alphanumerics, spaces and underscores; trim trailing whitespace.
pub fn sanitize_folder_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    kept.trim_end().to_string()
}
