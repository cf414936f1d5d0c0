//! Download record types and their persisted form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque, immutable identifier of a download
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Download status enum
///
/// The serialized labels are part of the on-disk format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Finished,
    Error,
    Stopped,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Downloading => "Downloading",
            Self::Paused => "Paused",
            Self::Finished => "Finished",
            Self::Error => "Error",
            Self::Stopped => "Stopped",
        }
    }

    /// Finished, Error and Stopped: nothing happens until the user acts
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Stopped)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-requested download.
///
/// Only the scheduler mutates records; everyone else sees snapshots.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub url: String,
    /// Full path of the final file
    pub destination: PathBuf,
    pub filename: String,
    pub category: String,
    pub status: DownloadStatus,
    /// 0 until the size is discovered
    pub total_size: u64,
    /// Aggregate across all segments
    pub downloaded_size: u64,
    pub split_count: usize,
    /// Automatic retries spent since the last user retry
    pub retries: u32,
    pub error_message: Option<String>,
    /// Extra request headers sent verbatim with every request
    pub headers: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Create a new download record in the Queued state
    pub fn new(url: String, destination: PathBuf, category: String, split_count: usize) -> Self {
        let filename = filename_of(&destination);
        Self {
            id: DownloadId::new(),
            url,
            destination,
            filename,
            category,
            status: DownloadStatus::Queued,
            total_size: 0,
            downloaded_size: 0,
            split_count: split_count.max(1),
            retries: 0,
            error_message: None,
            headers: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Get progress as a percentage (0.0 - 100.0)
    pub fn progress(&self) -> f64 {
        if self.total_size > 0 {
            (self.downloaded_size as f64 / self.total_size as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Set the aggregate byte count, clamped to the known size
    pub fn set_downloaded(&mut self, bytes: u64) {
        self.downloaded_size = if self.total_size > 0 {
            bytes.min(self.total_size)
        } else {
            bytes
        };
    }

    /// Path of segment `index` for a split download
    pub fn part_path(&self, index: usize) -> PathBuf {
        crate::download::part_path(&self.destination, index)
    }
}

/// A download record as written to the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: DownloadId,
    pub url: String,
    pub destination: PathBuf,
    pub status: DownloadStatus,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub downloaded_size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_split_count")]
    pub split_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl From<&DownloadRecord> for PersistedRecord {
    fn from(record: &DownloadRecord) -> Self {
        Self {
            id: record.id.clone(),
            url: record.url.clone(),
            destination: record.destination.clone(),
            status: record.status,
            category: record.category.clone(),
            total_size: record.total_size,
            downloaded_size: record.downloaded_size,
            created_at: record.created_at,
            split_count: record.split_count,
            headers: record.headers.clone(),
        }
    }
}

impl PersistedRecord {
    /// Rebuild the in-memory record after a restart.
    ///
    /// A transfer that was live when the process died cannot continue
    /// mid-stream, so Downloading and Paused both come back as Paused.
    pub fn into_record(self) -> DownloadRecord {
        let status = match self.status {
            DownloadStatus::Downloading | DownloadStatus::Paused => DownloadStatus::Paused,
            other => other,
        };
        let mut record = DownloadRecord {
            filename: filename_of(&self.destination),
            id: self.id,
            url: self.url,
            destination: self.destination,
            category: self.category,
            status,
            total_size: self.total_size,
            downloaded_size: 0,
            split_count: self.split_count.max(1),
            retries: 0,
            error_message: None,
            headers: self.headers,
            created_at: self.created_at,
        };
        record.set_downloaded(self.downloaded_size);
        record
    }
}

fn filename_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn default_category() -> String {
    crate::config::DEFAULT_CATEGORY.to_string()
}

fn default_split_count() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DownloadRecord {
        DownloadRecord::new(
            "http://example.com/a.zip".into(),
            PathBuf::from("/tmp/dl/a.zip"),
            "Archives".into(),
            4,
        )
    }

    #[test]
    fn new_record_is_queued_with_filename() {
        let r = record();
        assert_eq!(r.status, DownloadStatus::Queued);
        assert_eq!(r.filename, "a.zip");
        assert_eq!(r.split_count, 4);
    }

    #[test]
    fn split_count_is_at_least_one() {
        let r = DownloadRecord::new("u".into(), PathBuf::from("f"), "General".into(), 0);
        assert_eq!(r.split_count, 1);
    }

    #[test]
    fn downloaded_is_clamped_to_total() {
        let mut r = record();
        r.set_downloaded(500);
        assert_eq!(r.downloaded_size, 500);
        r.total_size = 100;
        r.set_downloaded(500);
        assert_eq!(r.downloaded_size, 100);
        assert_eq!(r.progress(), 100.0);
    }

    #[test]
    fn live_statuses_are_restored_as_paused() {
        for status in [DownloadStatus::Downloading, DownloadStatus::Paused] {
            let mut r = record();
            r.status = status;
            let restored = PersistedRecord::from(&r).into_record();
            assert_eq!(restored.status, DownloadStatus::Paused);
        }
        for status in [
            DownloadStatus::Queued,
            DownloadStatus::Finished,
            DownloadStatus::Error,
            DownloadStatus::Stopped,
        ] {
            let mut r = record();
            r.status = status;
            assert_eq!(PersistedRecord::from(&r).into_record().status, status);
        }
    }

    #[test]
    fn status_labels_are_stable() {
        let json = serde_json::to_string(&DownloadStatus::Downloading).unwrap();
        assert_eq!(json, "\"Downloading\"");
        let back: DownloadStatus = serde_json::from_str("\"Stopped\"").unwrap();
        assert_eq!(back, DownloadStatus::Stopped);
        assert!(serde_json::from_str::<DownloadStatus>("\"stopped\"").is_err());
    }

    #[test]
    fn persisted_record_has_flat_schema() {
        let r = record();
        let value = serde_json::to_value(PersistedRecord::from(&r)).unwrap();
        for key in [
            "id",
            "url",
            "destination",
            "status",
            "category",
            "total_size",
            "downloaded_size",
            "created_at",
            "split_count",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert!(value.get("headers").is_none());
        assert_eq!(value["id"], r.id.as_str());
    }
}
