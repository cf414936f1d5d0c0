//! Download engine: transfers, planning, merging and the scheduler

mod manager;
pub mod merge;
pub mod planner;
pub mod progress;
mod scheduler;
pub mod task;
pub mod throttle;

pub use manager::{ControlAction, DownloadManager, DownloadStats, NewDownload};
pub use merge::part_path;
pub use scheduler::MAX_RETRIES;

use crate::store::{DownloadId, DownloadRecord, DownloadStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Point-in-time view of a download handed to the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct DownloadSnapshot {
    pub id: DownloadId,
    pub url: String,
    pub destination: PathBuf,
    pub filename: String,
    pub category: String,
    pub status: DownloadStatus,
    pub total_size: u64,
    pub downloaded_size: u64,
    /// 0.0 - 100.0
    pub progress: f64,
    /// Bytes per second
    pub speed: u64,
    pub eta: Option<Duration>,
    pub split_count: usize,
    pub retries: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DownloadSnapshot {
    pub(crate) fn new(record: &DownloadRecord, speed: u64, eta: Option<Duration>) -> Self {
        Self {
            id: record.id.clone(),
            url: record.url.clone(),
            destination: record.destination.clone(),
            filename: record.filename.clone(),
            category: record.category.clone(),
            status: record.status,
            total_size: record.total_size,
            downloaded_size: record.downloaded_size,
            progress: record.progress(),
            speed,
            eta,
            split_count: record.split_count,
            retries: record.retries,
            error: record.error_message.clone(),
            created_at: record.created_at,
        }
    }
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Records were added, removed or changed status
    ModelChanged,
    ItemUpdated(DownloadSnapshot),
    DownloadCompleted { id: DownloadId, filename: String },
}

/// File name suggested by the last segment of a URL's path.
///
/// The result is always a single path component: decoded separators are
/// replaced and `.`/`..` are rejected, falling back to a generated name.
pub fn extract_filename(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let last = parsed.path_segments()?.next_back()?.to_string();
            let decoded = urlencoding::decode(&last)
                .map(|s| s.into_owned())
                .unwrap_or(last);
            sanitize_filename(&decoded)
        })
        .unwrap_or_else(|| format!("download_{}", uuid::Uuid::new_v4()))
}

fn sanitize_filename(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    let file_name = Path::new(cleaned).file_name()?.to_str()?;
    if file_name.is_empty() || file_name == "." || file_name == ".." {
        return None;
    }
    Some(file_name.to_string())
}
