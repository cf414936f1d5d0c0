//! Settings data structures

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the category used when nothing more specific matches
pub const DEFAULT_CATEGORY: &str = "General";

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Where the download list is persisted (defaults to the config dir)
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Values consumed by the download engine
    pub downloads: DownloadSettings,

    /// Category id to destination folder mappings
    pub categories: HashMap<String, CategoryConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        let mut categories = HashMap::new();

        let downloads_dir = default_download_dir();

        categories.insert(
            "general".to_string(),
            CategoryConfig {
                name: DEFAULT_CATEGORY.to_string(),
                extensions: vec!["*".to_string()],
                destination: downloads_dir.clone(),
            },
        );

        categories.insert(
            "video".to_string(),
            CategoryConfig {
                name: "Video".to_string(),
                extensions: strings(&["mp4", "mkv", "avi", "mov", "webm"]),
                destination: downloads_dir.join("Videos"),
            },
        );

        categories.insert(
            "audio".to_string(),
            CategoryConfig {
                name: "Audio".to_string(),
                extensions: strings(&["mp3", "flac", "wav", "aac", "ogg"]),
                destination: downloads_dir.join("Audio"),
            },
        );

        categories.insert(
            "documents".to_string(),
            CategoryConfig {
                name: "Documents".to_string(),
                extensions: strings(&["pdf", "doc", "docx", "txt", "xlsx"]),
                destination: downloads_dir.join("Documents"),
            },
        );

        categories.insert(
            "images".to_string(),
            CategoryConfig {
                name: "Images".to_string(),
                extensions: strings(&["jpg", "jpeg", "png", "gif", "webp", "svg"]),
                destination: downloads_dir.join("Images"),
            },
        );

        categories.insert(
            "archives".to_string(),
            CategoryConfig {
                name: "Archives".to_string(),
                extensions: strings(&["zip", "rar", "7z", "tar", "gz"]),
                destination: downloads_dir.join("Archives"),
            },
        );

        Self {
            state_file: None,
            downloads: DownloadSettings::default(),
            categories,
        }
    }
}

impl Settings {
    /// Resolve the category label for a filename by its extension.
    ///
    /// Falls back to [`DEFAULT_CATEGORY`] when no category lists the extension.
    pub fn category_for_filename(&self, filename: &str) -> String {
        let ext = Path::new(filename)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());

        let Some(ext) = ext else {
            return DEFAULT_CATEGORY.to_string();
        };

        let mut matches: Vec<&CategoryConfig> = self
            .categories
            .values()
            .filter(|c| c.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
            .collect();
        // HashMap order is unstable; pick deterministically
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        matches
            .first()
            .map(|c| c.name.clone())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }

    /// Destination folder configured for a category label, if any
    pub fn destination_for_category(&self, category: &str) -> Option<&Path> {
        self.categories
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(category))
            .map(|c| c.destination.as_path())
    }
}

/// Configuration consumed by the download engine.
///
/// The engine gets a copy at construction and a fresh one through
/// `DownloadManager::update_config`; it never reads settings from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Maximum number of downloads in the Downloading state at once
    pub max_concurrent_downloads: usize,

    /// Speed cap per download in KiB/s, 0 means unlimited
    pub speed_limit_kbps: u64,

    /// Folder used when a download is added without a destination
    pub default_destination: PathBuf,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Maximum silence on a response body before the transfer fails
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            speed_limit_kbps: 0,
            default_destination: default_download_dir(),
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl DownloadSettings {
    /// Concurrency limit, never below one
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }

    /// Speed cap in bytes per second, `None` when unlimited
    pub fn speed_limit_bytes(&self) -> Option<u64> {
        (self.speed_limit_kbps > 0).then(|| self.speed_limit_kbps * 1024)
    }
}

/// Configuration for a download category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Display name, also the label stored on records
    pub name: String,

    /// File extensions that belong to this category
    pub extensions: Vec<String>,

    /// Destination folder for downloads of this category
    pub destination: PathBuf,
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("./downloads"))
}

fn default_user_agent() -> String {
    format!("MacanDownloader/{}", env!("CARGO_PKG_VERSION"))
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
